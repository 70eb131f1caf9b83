extern crate corella;

extern crate clap;
use clap::*;

#[macro_use]
extern crate log;

extern crate bird_tool_utils;
use bird_tool_utils::clap_utils::*;

static PROGRAM_NAME: &str = "Corella";

fn main() {
    let app = build_cli();
    let matches = app.clone().get_matches();
    set_log_level(&matches, false, PROGRAM_NAME, crate_version!());

    match matches.subcommand_name() {
        Some("cluster") => {
            corella::cluster_argument_parsing::run_cluster_subcommand(
                &matches,
                "corella",
                crate_version!(),
            );
        }
        _ => {
            error!("Programming error: unexpected subcommand");
            std::process::exit(1);
        }
    }
}

fn build_cli() -> Command {
    let app = add_clap_verbosity_flags(Command::new("corella"))
        .version(crate_version!())
        .about("Genome dereplicator: MinHash preclustering then nucmer ANI clustering")
        .arg_required_else_help(true);

    corella::cluster_argument_parsing::add_cluster_subcommand(app)
}

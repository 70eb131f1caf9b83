use bird_tool_utils::external_command_checker::*;

pub fn check_for_dependencies(precluster_method: &str, skip_precluster: bool, skip_cluster: bool) {
    if !skip_precluster && precluster_method == "mash" {
        check_for_mash();
    }
    if !skip_cluster {
        check_for_nucmer();
    }
}

pub fn check_for_mash() {
    self::check_for_external_command_presence("mash", "which mash");
}

pub fn check_for_nucmer() {
    self::check_for_external_command_presence("nucmer", "which nucmer");
}

//! Unprivileged execution
//!
//! Tools that must see the working tree as root (umoci repack, chroot)
//! run inside a user namespace mapping the caller to uid 0 when strata
//! itself is not root.

/// Whether the current process runs as root
pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() == 0 }
}

/// Prefix `program args` with `unshare --user --map-root-user` when
/// running unprivileged; returns the program and argument list to spawn
pub fn maybe_in_userns(program: &str, args: Vec<String>) -> (String, Vec<String>) {
    wrap(is_root(), program, args)
}

fn wrap(root: bool, program: &str, args: Vec<String>) -> (String, Vec<String>) {
    if root {
        return (program.to_string(), args);
    }
    let mut wrapped = vec![
        "--user".to_string(),
        "--map-root-user".to_string(),
        "--".to_string(),
        program.to_string(),
    ];
    wrapped.extend(args);
    ("unshare".to_string(), wrapped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_runs_directly() {
        let (program, args) = wrap(true, "umoci", vec!["repack".to_string()]);
        assert_eq!(program, "umoci");
        assert_eq!(args, vec!["repack"]);
    }

    #[test]
    fn unprivileged_goes_through_unshare() {
        let (program, args) = wrap(false, "umoci", vec!["repack".to_string()]);
        assert_eq!(program, "unshare");
        assert_eq!(args, vec!["--user", "--map-root-user", "--", "umoci", "repack"]);
    }
}

//! Signal number to symbolic name translation
//!
//! SSH exit-signal reporting uses symbolic names without the SIG
//! prefix ("TERM", not "SIGTERM" or 15). This table covers the POSIX
//! signals a child process can realistically die from.

/// Translate a termination signal number to its symbolic name.
///
/// Returns `None` for numbers outside the portable set; callers report
/// those numerically.
pub fn signal_name(signal: i32) -> Option<&'static str> {
    match signal {
        1 => Some("HUP"),
        2 => Some("INT"),
        3 => Some("QUIT"),
        4 => Some("ILL"),
        5 => Some("TRAP"),
        6 => Some("ABRT"),
        7 => Some("BUS"),
        8 => Some("FPE"),
        9 => Some("KILL"),
        10 => Some("USR1"),
        11 => Some("SEGV"),
        12 => Some("USR2"),
        13 => Some("PIPE"),
        14 => Some("ALRM"),
        15 => Some("TERM"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_signals() {
        assert_eq!(signal_name(2), Some("INT"));
        assert_eq!(signal_name(9), Some("KILL"));
        assert_eq!(signal_name(15), Some("TERM"));
    }

    #[test]
    fn test_unknown_signal() {
        assert_eq!(signal_name(0), None);
        assert_eq!(signal_name(64), None);
        assert_eq!(signal_name(-1), None);
    }
}

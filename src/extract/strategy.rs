//! Access strategies, tried in order until one retrieves the file
//!
//! Firmware variants disagree on how privilege escalation is spelled, so
//! the same command is offered unwrapped, as `su 0 <cmd>`, and as
//! `su -c "<cmd>"`. Supporting another variant is one more entry in
//! `default_strategies`.

/// One way of running a remote shell command
#[derive(Debug, Clone, Copy)]
pub struct AccessStrategy {
    pub name: &'static str,
    wrap: fn(&str) -> String,
}

impl AccessStrategy {
    pub const fn new(name: &'static str, wrap: fn(&str) -> String) -> Self {
        Self { name, wrap }
    }

    pub fn wrap(&self, command: &str) -> String {
        (self.wrap)(command)
    }
}

fn unwrapped(command: &str) -> String {
    command.to_string()
}

fn su_uid(command: &str) -> String {
    format!("su 0 {}", command)
}

fn su_command(command: &str) -> String {
    format!("su -c \"{}\"", command.replace('"', "\\\""))
}

pub const DIRECT: AccessStrategy = AccessStrategy::new("direct", unwrapped);
pub const SU_UID: AccessStrategy = AccessStrategy::new("su0", su_uid);
pub const SU_COMMAND: AccessStrategy = AccessStrategy::new("su-c", su_command);

/// Priority order: unprivileged first, then the two escalation syntaxes
pub fn default_strategies() -> Vec<AccessStrategy> {
    vec![DIRECT, SU_UID, SU_COMMAND]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrappers() {
        assert_eq!(DIRECT.wrap("cp a b"), "cp a b");
        assert_eq!(SU_UID.wrap("cp a b"), "su 0 cp a b");
        assert_eq!(SU_COMMAND.wrap("cp a b"), "su -c \"cp a b\"");
        assert_eq!(SU_COMMAND.wrap("echo \"x\""), "su -c \"echo \\\"x\\\"\"");
    }

    #[test]
    fn test_default_order() {
        let names: Vec<_> = default_strategies().iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["direct", "su0", "su-c"]);
    }
}

use crate::command::{ParsedCommand, names_match};

/// Resolve the databases an invocation operates on.
///
/// `catalog` is only consulted for `/ALL`, where the listed names are
/// exclusions. An unset selection yields nothing rather than failing.
pub fn select_databases(cmd: &ParsedCommand, catalog: &[String]) -> Vec<String> {
    match cmd.use_all_databases() {
        None => Vec::new(),
        Some(false) => cmd.databases().to_vec(),
        Some(true) => {
            let mut selected: Vec<String> = Vec::new();
            for name in catalog {
                let excluded = cmd.databases().iter().any(|ex| names_match(ex, name));
                let seen = selected.iter().any(|s| names_match(s, name));
                if !excluded && !seen {
                    selected.push(name.clone());
                }
            }
            selected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn cmd(line: &str) -> ParsedCommand {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        parse(&tokens).unwrap()
    }

    fn catalog(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn all_except_keeps_catalog_order() {
        let selected = select_databases(&cmd("/OFFLINE /ALL B"), &catalog(&["A", "B", "C"]));
        assert_eq!(selected, ["A", "C"]);
    }

    #[test]
    fn exclusions_ignore_case() {
        let selected = select_databases(
            &cmd("/OFFLINE /ALL sales DEV"),
            &catalog(&["Sales", "hr", "dev", "Audit"]),
        );
        assert_eq!(selected, ["hr", "Audit"]);
    }

    #[test]
    fn all_without_exclusions_is_the_whole_catalog_once() {
        let selected = select_databases(&cmd("/ONLINE /ALL"), &catalog(&["a", "b", "A"]));
        assert_eq!(selected, ["a", "b"]);
    }

    #[test]
    fn explicit_list_ignores_catalog() {
        let selected = select_databases(&cmd("/PURGE /DB gone zeta alpha"), &catalog(&["alpha"]));
        assert_eq!(selected, ["gone", "zeta", "alpha"]);
    }

    #[test]
    fn unset_selection_is_empty() {
        assert!(select_databases(&cmd("/LIST"), &catalog(&["a"])).is_empty());
    }
}

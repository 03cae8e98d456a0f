use std::path::PathBuf;

use clap::{ArgAction, Parser};

/// CLI entry point.
///
/// Only the options in front of the mode are handled here; everything from
/// the mode on follows the slash grammar printed by `/?`.
#[derive(Parser, Debug)]
#[command(
    name = "sqlbackup",
    version,
    about = "Back up, restore and maintain SQL Server databases"
)]
pub struct Cli {
    /// Path to the config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// More log output (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Mode and its arguments, e.g. /BACKUP /C LOCAL /DIR D:\SqlBackup /ALL
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "ARGS")]
    pub args: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slash_tokens_are_passed_through() {
        let cli = Cli::try_parse_from([
            "sqlbackup", "-vv", "/BACKUP", "/C", "LOCAL", "/DIR", "/srv/bk", "/ALL",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.args, ["/BACKUP", "/C", "LOCAL", "/DIR", "/srv/bk", "/ALL"]);
    }

    #[test]
    fn config_goes_before_the_mode() {
        let cli = Cli::try_parse_from(["sqlbackup", "--config", "x.toml", "/LIST", "/C", "LOCAL"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
        assert_eq!(cli.args.len(), 3);
    }

    #[test]
    fn no_arguments_at_all() {
        let cli = Cli::try_parse_from(["sqlbackup"]).unwrap();
        assert!(cli.args.is_empty());
    }
}

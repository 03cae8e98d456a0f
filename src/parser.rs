use crate::command::{Action, ParseError, ParsedCommand};
use crate::mode::{FLAG_MARKER, Flag};

/// Scan the raw mode tokens (everything after the process options) into a
/// [`ParsedCommand`]. No tokens at all means help.
pub fn parse<S: AsRef<str>>(args: &[S]) -> Result<ParsedCommand, ParseError> {
    let mut cmd = ParsedCommand::default();
    let Some((first, rest)) = args.split_first() else {
        cmd.set_mode("/?")?;
        return Ok(cmd);
    };
    cmd.set_mode(first.as_ref())?;

    let mut tokens = rest.iter().map(S::as_ref);
    let mut reading_databases = false;

    while let Some(raw) = tokens.next() {
        let token = raw.trim();
        if token.starts_with(FLAG_MARKER) {
            reading_databases = false;
        }

        let action = match Flag::classify(token) {
            Some(Flag::All) => {
                reading_databases = true;
                Action::SelectAll
            }
            Some(Flag::Db) => {
                reading_databases = true;
                Action::SelectListed
            }
            Some(Flag::Log) => Action::LogBackup,
            Some(Flag::Verify) => Action::Verify,
            Some(Flag::Dismount) => Action::Dismount,
            Some(Flag::Json) => Action::Json,
            Some(Flag::Recovery(model)) => Action::Recovery {
                model,
                token: token.to_string(),
            },
            Some(flag @ Flag::Connection) => Action::Connection(value_for(flag, &mut tokens)?),
            Some(flag @ (Flag::Dir | Flag::File)) => Action::Location {
                path: value_for(flag, &mut tokens)?,
                is_directory: flag == Flag::Dir,
            },
            Some(flag @ Flag::Id) => Action::BackupId(value_for(flag, &mut tokens)?),
            None if reading_databases => Action::AddDatabase(token.to_string()),
            None => return Err(ParseError::UnknownArgument(token.to_string())),
        };
        cmd.apply(action)?;
    }

    Ok(cmd)
}

/// The token following a value-taking flag, taken verbatim.
fn value_for<'a>(
    flag: Flag,
    tokens: &mut impl Iterator<Item = &'a str>,
) -> Result<String, ParseError> {
    tokens
        .next()
        .map(str::to_string)
        .ok_or(ParseError::MissingValue(flag.keyword()))
}

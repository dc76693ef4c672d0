use std::path::PathBuf;

use querent_api::{DataSourceId, DatabaseType, NewDataSource, SessionId};
use snafu::{OptionExt, ResultExt};

use super::error::{
    AppResult, InvalidArgumentSnafu, MalformedArgumentSnafu, MissingArgumentSnafu,
    UnknownCommandSnafu,
};

const CREATE_USAGE: &str = "<postgresql|mysql|oracle> <name> <user>:<password>@<host>:<port>/<database>";

pub const HELP: &str = "\
/sources            list owned data sources
/use <id>           select a data source and load its chats
/sessions           list chats for the selected data source
/switch <id>        open a chat and load its history
/new                start a new chat (created by the first question)
/delete <id>        delete a chat
/retry              resend the last question that failed
/direct <question>  ask the engine directly, outside chat history
/test               test the selected data source connection
/create <type> <name> <user>:<password>@<host>:<port>/<database>
                    register a data source
/login <user> <password>
                    sign in and remember the token
/export <path>      write the latest result rows as CSV
/show               print the open chat
/help               show this help
/quit               exit
anything else is sent as a question";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Sources,
    Use(DataSourceId),
    Sessions,
    Switch(SessionId),
    New,
    Delete(SessionId),
    Retry,
    Direct(String),
    Test,
    Create(NewDataSource),
    Login { username: String, password: String },
    Export(PathBuf),
    Show,
    Help,
    Quit,
    Ask(String),
    Empty,
}

impl Command {
    pub fn parse(line: &str) -> AppResult<Self> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Self::Empty);
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Self::Ask(line.to_string()));
        };

        let (name, argument) = match rest.split_once(char::is_whitespace) {
            Some((name, argument)) => (name, argument.trim()),
            None => (rest, ""),
        };

        match name {
            "sources" => Ok(Self::Sources),
            "use" => Ok(Self::Use(parse_id(argument, "/use")?)),
            "sessions" => Ok(Self::Sessions),
            "switch" => Ok(Self::Switch(parse_id(argument, "/switch")?)),
            "new" => Ok(Self::New),
            "delete" => Ok(Self::Delete(parse_id(argument, "/delete")?)),
            "retry" => Ok(Self::Retry),
            "direct" => {
                let question = Some(argument)
                    .filter(|argument| !argument.is_empty())
                    .context(MissingArgumentSnafu {
                        stage: "parse-command",
                        command: "/direct",
                        argument: "a question",
                    })?;
                Ok(Self::Direct(question.to_string()))
            }
            "test" => Ok(Self::Test),
            "create" => parse_create(argument).map(Self::Create),
            "login" => {
                let mut parts = argument.split_whitespace();
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(username), Some(password), None) => Ok(Self::Login {
                        username: username.to_string(),
                        password: password.to_string(),
                    }),
                    _ => MalformedArgumentSnafu {
                        stage: "parse-command",
                        command: "/login",
                        expected: "<user> <password>",
                    }
                    .fail(),
                }
            }
            "export" => {
                let path = Some(argument)
                    .filter(|argument| !argument.is_empty())
                    .context(MissingArgumentSnafu {
                        stage: "parse-command",
                        command: "/export",
                        argument: "a file path",
                    })?;
                Ok(Self::Export(PathBuf::from(path)))
            }
            "show" => Ok(Self::Show),
            "help" | "?" => Ok(Self::Help),
            "quit" | "exit" => Ok(Self::Quit),
            other => UnknownCommandSnafu {
                stage: "parse-command",
                command: format!("/{other}"),
            }
            .fail(),
        }
    }
}

fn parse_create(argument: &str) -> AppResult<NewDataSource> {
    let malformed = || {
        MalformedArgumentSnafu {
            stage: "parse-create",
            command: "/create",
            expected: CREATE_USAGE,
        }
        .build()
    };

    let parts: Vec<&str> = argument.split_whitespace().collect();
    let [kind, name, target] = parts.as_slice() else {
        return Err(malformed());
    };
    let database_type = DatabaseType::from_driver_name(kind).ok_or_else(malformed)?;
    let (credentials, address) = target.rsplit_once('@').ok_or_else(malformed)?;
    let (username, password) = credentials.split_once(':').ok_or_else(malformed)?;
    let (host_port, database_name) = address.split_once('/').ok_or_else(malformed)?;
    let (host, port) = host_port.rsplit_once(':').ok_or_else(malformed)?;
    let port = port.parse::<u16>().map_err(|_| malformed())?;
    if [username, host, database_name].iter().any(|part| part.is_empty()) {
        return Err(malformed());
    }

    Ok(NewDataSource {
        database_type,
        name: name.to_string(),
        host: host.to_string(),
        port,
        database_name: database_name.to_string(),
        username: username.to_string(),
        password: password.to_string(),
    })
}

fn parse_id<T>(argument: &str, command: &'static str) -> AppResult<T>
where
    T: std::str::FromStr<Err = querent_api::ApiError>,
{
    let argument = Some(argument)
        .filter(|argument| !argument.is_empty())
        .context(MissingArgumentSnafu {
            stage: "parse-command",
            command,
            argument: "an id",
        })?;
    argument.parse::<T>().context(InvalidArgumentSnafu {
        stage: "parse-command",
        command,
    })
}

use querent_api::ApiError;
use querent_session::SessionError;
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AppError {
    #[snafu(display("failed to set up backend client on `{stage}`: {source}"))]
    Client {
        stage: &'static str,
        source: ApiError,
    },
    #[snafu(display("{source}"))]
    Session {
        stage: &'static str,
        source: SessionError,
    },
    #[snafu(display("failed to read input on `{stage}`: {source}"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("unknown command `{command}`, try /help"))]
    UnknownCommand {
        stage: &'static str,
        command: String,
    },
    #[snafu(display("`{command}` needs {argument}"))]
    MissingArgument {
        stage: &'static str,
        command: &'static str,
        argument: &'static str,
    },
    #[snafu(display("`{command}` got an invalid id: {source}"))]
    InvalidArgument {
        stage: &'static str,
        command: &'static str,
        source: ApiError,
    },
    #[snafu(display("`{command}` expects {expected}"))]
    MalformedArgument {
        stage: &'static str,
        command: &'static str,
        expected: &'static str,
    },
    #[snafu(display("login failed: {source}"))]
    Login {
        stage: &'static str,
        source: ApiError,
    },
    #[snafu(display("no result rows to export yet"))]
    NothingToExport { stage: &'static str },
    #[snafu(display("cannot write {}: {source}", path.display()))]
    WriteExport {
        stage: &'static str,
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("no data source selected, use /sources and /use <id>"))]
    NoDataSourceSelected { stage: &'static str },
}

pub type AppResult<T> = Result<T, AppError>;

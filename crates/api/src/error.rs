use std::num::ParseIntError;

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ApiError {
    #[snafu(display("backend id '{raw}' is invalid for {id_type}"))]
    InvalidId {
        stage: &'static str,
        id_type: &'static str,
        raw: String,
        source: ParseIntError,
    },
    #[snafu(display("failed to build http client on `{stage}`: {source}"))]
    BuildClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("request to {url} failed on `{stage}`: {source}"))]
    Transport {
        stage: &'static str,
        url: String,
        source: reqwest::Error,
    },
    #[snafu(display("{url} answered with status {status}: {message}"))]
    HttpStatus {
        stage: &'static str,
        url: String,
        status: u16,
        message: String,
    },
    #[snafu(display("{message}"))]
    Backend {
        stage: &'static str,
        code: i64,
        message: String,
    },
    #[snafu(display("failed to decode response from {url} on `{stage}`: {source}"))]
    Decode {
        stage: &'static str,
        url: String,
        source: serde_json::Error,
    },
    #[snafu(display("response from {url} carried no data on `{stage}`"))]
    MissingData { stage: &'static str, url: String },
}

pub type ApiResult<T> = Result<T, ApiError>;

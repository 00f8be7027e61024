#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("{source}")]
    TomlDe {
        #[from]
        source: toml::de::Error,
    },
    #[error("{source}")]
    TomlSer {
        #[from]
        source: toml::ser::Error,
    },
    #[error("{source}")]
    SerdeJson {
        #[from]
        source: serde_json::Error,
    },
    #[error("{source}")]
    ShellExpand {
        #[from]
        source: shellexpand::LookupError<std::env::VarError>,
    },
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

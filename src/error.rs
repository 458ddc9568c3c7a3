use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid argument: {0}.")]
    InvalidArgument(String),
    #[error("String is not valid MQTT UTF-8.")]
    MalformedUtf8,
    #[error("Out of memory: client handle limit of {limit} reached.")]
    NoMemory { limit: usize },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Cannot encode or decode MQTT packet: {0:?}")]
    Mqtt(mqttbytes::Error),
    #[error("Connection refused by broker: {0}.")]
    ConnectionRefused(String),
    #[error("Connection closed before CONNACK.")]
    ConnectionClosed,
    #[error("Expected CONNACK, received {0}.")]
    UnexpectedPacket(String),
    #[error("Timed out waiting for the broker.")]
    Timeout,
}

impl From<mqttbytes::Error> for Error {
    fn from(error: mqttbytes::Error) -> Self {
        Self::Mqtt(error)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

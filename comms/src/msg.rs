use std::{borrow::Cow, io};

use crate::{Deserialize, Serialize};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

const ERR_H: Header = 0;
const CONTROL_H: Header = 1;
const BATCH_H: Header = 2;

/// The payload data for the `Data` variant of the `Msg` enum.
#[derive(Debug)]
pub enum Payload<'a> {
    /// An encoded trajectory batch, opaque at this layer.
    Batch(&'a [u8]),
}

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// The learner consumed the last batch and accepts more.
    Ack,
    /// The learner will consume no further batches, the sender must stop.
    Stop,
}

/// The application layer message between an actor and its learner.
#[derive(Debug)]
pub enum Msg<'a> {
    Control(Command),
    Data(Payload<'a>),
    Err(Cow<'a, str>),
}

impl Msg<'_> {
    /// A short name for the kind of message, used in logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Control(Command::Ack) => "control/ack",
            Msg::Control(Command::Stop) => "control/stop",
            Msg::Data(Payload::Batch(_)) => "data/batch",
            Msg::Err(_) => "err",
        }
    }

    fn buf_is_too_small<T>(size: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("The given buffer is too small {size}, must at least be {HEADER_SIZE} bytes"),
        ))
    }

    fn invalid_kind<T>(kind: Header) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Received an invalid kind header {kind}"),
        ))
    }
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        match self {
            Msg::Err(e) => {
                buf.extend_from_slice(&ERR_H.to_be_bytes());
                Some(e.as_bytes())
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&CONTROL_H.to_be_bytes());

                // SAFETY: Serialize impl for `Command` is derived and holds no maps,
                //         writing it into a `Vec` can't fail.
                serde_json::to_writer(buf, cmd).unwrap();
                None
            }
            Msg::Data(Payload::Batch(bytes)) => {
                buf.extend_from_slice(&BATCH_H.to_be_bytes());
                Some(*bytes)
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Self::buf_is_too_small(buf.len());
        }

        let (kind_buf, rest) = buf.split_at(HEADER_SIZE);

        // SAFETY: We splitted the buffer to be of size `HEADER_SIZE` just above.
        let kind = Header::from_be_bytes(kind_buf.try_into().unwrap());

        match kind {
            ERR_H => {
                let text = std::str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(Cow::Borrowed(text)))
            }
            CONTROL_H => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            BATCH_H => Ok(Self::Data(Payload::Batch(rest))),
            other => Self::invalid_kind(other),
        }
    }
}

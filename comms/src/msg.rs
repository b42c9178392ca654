use std::io;

use crate::{
    DType, Deserialize, ParameterKey, Rank, RemoteErr, Serialize, Values,
    specs::{Assignment, InitHeader, PushHeader, Registration, ShutdownReason, ValueHeader},
};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

const ERR: Header = 0;
const CONTROL: Header = 1;
const INIT: Header = 2;
const PUSH: Header = 3;
const VALUE: Header = 4;

/// Tensor bodies are padded so their elements start at this alignment.
const VALUES_ALIGN: usize = size_of::<f32>();

/// The payload data for the `Data` variant of the `Msg` enum.
#[derive(Debug)]
pub enum Payload<'a> {
    Init(InitHeader, Values<'a>),
    Push(PushHeader, Values<'a>),
    Value(ValueHeader, Values<'a>),
}

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Member to scheduler, first message of the connection.
    Register(Registration),
    /// Scheduler to member, the answer to `Register`.
    Assigned(Assignment),
    Heartbeat,
    /// A worker finished all of its steps.
    Done,
    /// A worker hit an unrecoverable error.
    Failed { reason: String },
    /// A server gave up waiting on a worker.
    ReportDead { rank: Rank },
    Shutdown(ShutdownReason),
    /// Worker to server, first message of the connection.
    Connect { rank: Rank },
    Pull { key: ParameterKey },
    /// Server to worker, an init or push was applied.
    Ack { key: ParameterKey, version: u64 },
    Disconnect,
}

/// The application layer message for the entire system.
#[derive(Debug)]
pub enum Msg<'a> {
    Control(Command),
    Data(Payload<'a>),
    Err(RemoteErr),
}

impl Msg<'_> {
    /// A short name of the message kind, meant for logs and error reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Control(_) => "control",
            Msg::Data(Payload::Init(..)) => "data/init",
            Msg::Data(Payload::Push(..)) => "data/push",
            Msg::Data(Payload::Value(..)) => "data/value",
            Msg::Err(_) => "err",
        }
    }
}

fn invalid_data<T>(text: impl Into<String>) -> io::Result<T> {
    Err(io::Error::new(io::ErrorKind::InvalidData, text.into()))
}

fn read_u32(buf: &[u8], at: usize) -> io::Result<u32> {
    match buf.get(at..at + size_of::<u32>()) {
        Some(bytes) => {
            let mut word = [0; size_of::<u32>()];
            word.copy_from_slice(bytes);
            Ok(u32::from_be_bytes(word))
        }
        None => invalid_data(format!(
            "the given buffer is too small {}, expected a word at {at}",
            buf.len()
        )),
    }
}

/// Writes the framing of a tensor body and returns its elements as the zero copy tail.
///
/// `buf` may already hold a prefix as long as its length is a multiple of `VALUES_ALIGN`.
fn write_tensor<'a, H: serde::Serialize>(
    buf: &mut Vec<u8>,
    kind: Header,
    header: &H,
    values: &Values<'a>,
) -> io::Result<Option<&'a [u8]>> {
    buf.extend_from_slice(&kind.to_be_bytes());
    buf.extend_from_slice(&values.dtype().tag().to_be_bytes());

    let len_at = buf.len();
    buf.extend_from_slice(&[0; size_of::<u32>()]);

    let start = buf.len();
    serde_json::to_writer(&mut *buf, header)?;
    let meta_len = (buf.len() - start) as u32;
    buf[len_at..start].copy_from_slice(&meta_len.to_be_bytes());

    let pad = (VALUES_ALIGN - buf.len() % VALUES_ALIGN) % VALUES_ALIGN;
    buf.resize(buf.len() + pad, 0);

    Ok(Some(values.as_bytes()))
}

/// Reads a tensor body, `rest` is the frame after its kind header.
fn read_tensor<'a, H: serde::de::DeserializeOwned>(rest: &'a [u8]) -> io::Result<(H, Values<'a>)> {
    let tag = read_u32(rest, 0)?;
    let Some(dtype) = DType::from_tag(tag) else {
        return invalid_data(format!("received an invalid dtype tag {tag}"));
    };

    let meta_len = read_u32(rest, size_of::<u32>())? as usize;
    let start = 2 * size_of::<u32>();
    let Some(meta) = rest.get(start..start + meta_len) else {
        return invalid_data(format!(
            "tensor header of {meta_len} bytes overruns the frame"
        ));
    };

    let header = serde_json::from_slice(meta)?;

    // The kind header already consumed `HEADER_SIZE` bytes of the frame.
    let end = HEADER_SIZE + start + meta_len;
    let offset = end.next_multiple_of(VALUES_ALIGN) - HEADER_SIZE;
    let bytes = rest.get(offset..).unwrap_or_default();

    let cast_err = |e: bytemuck::PodCastError| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid tensor elements: {e}"),
        )
    };

    let values = match dtype {
        DType::F32 => Values::F32(bytemuck::try_cast_slice(bytes).map_err(cast_err)?),
        DType::F16 => Values::F16(bytemuck::try_cast_slice(bytes).map_err(cast_err)?),
    };

    Ok((header, values))
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> io::Result<Option<&'a [u8]>> {
        match self {
            Msg::Err(e) => {
                buf.extend_from_slice(&ERR.to_be_bytes());
                serde_json::to_writer(buf, e)?;
                Ok(None)
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&CONTROL.to_be_bytes());
                serde_json::to_writer(buf, cmd)?;
                Ok(None)
            }
            Msg::Data(Payload::Init(header, values)) => write_tensor(buf, INIT, header, values),
            Msg::Data(Payload::Push(header, values)) => write_tensor(buf, PUSH, header, values),
            Msg::Data(Payload::Value(header, values)) => write_tensor(buf, VALUE, header, values),
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self> {
        let kind = read_u32(buf, 0)?;
        let rest = &buf[HEADER_SIZE..];

        match kind {
            ERR => Ok(Self::Err(serde_json::from_slice(rest)?)),
            CONTROL => Ok(Self::Control(serde_json::from_slice(rest)?)),
            INIT => {
                let (header, values) = read_tensor(rest)?;
                Ok(Self::Data(Payload::Init(header, values)))
            }
            PUSH => {
                let (header, values) = read_tensor(rest)?;
                Ok(Self::Data(Payload::Push(header, values)))
            }
            VALUE => {
                let (header, values) = read_tensor(rest)?;
                Ok(Self::Data(Payload::Value(header, values)))
            }
            kind => invalid_data(format!("received an invalid kind {kind}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{KvErr, PushMode, Shape};

    /// Serializes `msg` the way `OnoSender` lays it out, minus the length prefix.
    fn frame(msg: &Msg) -> Vec<u32> {
        let mut buf = Vec::new();
        let tail = msg.serialize(&mut buf).unwrap();
        buf.extend_from_slice(tail.unwrap_or_default());

        let mut words = vec![0u32; buf.len().div_ceil(4)];
        bytemuck::cast_slice_mut::<u32, u8>(&mut words)[..buf.len()].copy_from_slice(&buf);
        words
    }

    fn frame_len(msg: &Msg) -> usize {
        let mut buf = Vec::new();
        let tail = msg.serialize(&mut buf).unwrap();
        buf.len() + tail.map(<[_]>::len).unwrap_or_default()
    }

    #[test]
    fn push_frame_keeps_elements_aligned() {
        let grad = [1.0f32, -2.5, 3.25];
        let header = PushHeader {
            key: "w".into(),
            shape: Shape::new([3]),
            mode: PushMode::Accumulate,
            step: 7,
        };
        let msg = Msg::Data(Payload::Push(header.clone(), Values::F32(&grad)));

        let words = frame(&msg);
        let len = frame_len(&msg);
        let bytes = &bytemuck::cast_slice::<u32, u8>(&words)[..len];

        match Msg::deserialize(bytes).unwrap() {
            Msg::Data(Payload::Push(got, Values::F32(values))) => {
                assert_eq!(got, header);
                assert_eq!(values, grad);
            }
            other => panic!("unexpected msg: {other:?}"),
        }
    }

    #[test]
    fn err_frame_carries_structured_error() {
        let err = RemoteErr::Kv(KvErr::UnknownKey { key: "bias".into() });
        let msg = Msg::Err(err.clone());

        let words = frame(&msg);
        let len = frame_len(&msg);
        let bytes = &bytemuck::cast_slice::<u32, u8>(&words)[..len];

        match Msg::deserialize(bytes).unwrap() {
            Msg::Err(got) => assert_eq!(got, err),
            other => panic!("unexpected msg: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_kind_and_short_frames() {
        assert!(Msg::deserialize(&[0, 0]).is_err());
        assert!(Msg::deserialize(&[0, 0, 0, 9]).is_err());
    }

    #[test]
    fn rejects_ragged_elements() {
        let header = ValueHeader {
            key: "w".into(),
            shape: Shape::new([1]),
            version: 0,
        };
        let msg = Msg::Data(Payload::Value(header, Values::F32(&[1.0])));

        let words = frame(&msg);
        let len = frame_len(&msg);
        let bytes = &bytemuck::cast_slice::<u32, u8>(&words)[..len - 1];
        assert!(Msg::deserialize(bytes).is_err());
    }
}

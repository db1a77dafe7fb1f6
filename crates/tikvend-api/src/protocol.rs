// RouterOS binary API framing.
//
// The wire format is a stream of *sentences*; each sentence is a run of
// length-prefixed *words* terminated by a zero-length word. Word
// lengths use a variable 1–5 byte encoding with flag bits in the first
// byte. Reply sentences open with a control word: `!re` (data row),
// `!done` (terminal), `!trap` (command error), `!fatal` (connection
// error).

use std::collections::HashMap;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Error;

/// Upper bound on a single received word. Anything larger is a corrupt
/// frame, not data we want to buffer.
const MAX_WORD_LEN: u32 = 16 * 1024 * 1024;

// ── Length encoding ──────────────────────────────────────────────────

/// Append the variable-length prefix for a word of `len` bytes.
fn encode_length(buf: &mut BytesMut, len: usize) -> Result<(), Error> {
    if len < 0x80 {
        buf.put_u8(u8::try_from(len).map_err(|_| Error::WordTooLong { len })?);
    } else if len < 0x4000 {
        buf.put_u8(u8::try_from(len >> 8).unwrap_or(0) | 0x80);
        buf.put_u8(u8::try_from(len & 0xFF).unwrap_or(0));
    } else if len < 0x20_0000 {
        buf.put_u8(u8::try_from(len >> 16).unwrap_or(0) | 0xC0);
        buf.put_u8(u8::try_from((len >> 8) & 0xFF).unwrap_or(0));
        buf.put_u8(u8::try_from(len & 0xFF).unwrap_or(0));
    } else if len < 0x1000_0000 {
        buf.put_u8(u8::try_from(len >> 24).unwrap_or(0) | 0xE0);
        buf.put_u8(u8::try_from((len >> 16) & 0xFF).unwrap_or(0));
        buf.put_u8(u8::try_from((len >> 8) & 0xFF).unwrap_or(0));
        buf.put_u8(u8::try_from(len & 0xFF).unwrap_or(0));
    } else if let Ok(len32) = u32::try_from(len) {
        buf.put_u8(0xF0);
        buf.put_u32(len32);
    } else {
        return Err(Error::WordTooLong { len });
    }
    Ok(())
}

/// Read the variable-length prefix of the next word.
async fn read_length<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u32, Error> {
    let b0 = reader.read_u8().await?;

    let len = if b0 & 0x80 == 0 {
        u32::from(b0)
    } else if b0 & 0xC0 == 0x80 {
        let b1 = reader.read_u8().await?;
        (u32::from(b0 & 0x3F) << 8) | u32::from(b1)
    } else if b0 & 0xE0 == 0xC0 {
        let b1 = reader.read_u8().await?;
        let b2 = reader.read_u8().await?;
        (u32::from(b0 & 0x1F) << 16) | (u32::from(b1) << 8) | u32::from(b2)
    } else if b0 & 0xF0 == 0xE0 {
        let b1 = reader.read_u8().await?;
        let b2 = reader.read_u8().await?;
        let b3 = reader.read_u8().await?;
        (u32::from(b0 & 0x0F) << 24) | (u32::from(b1) << 16) | (u32::from(b2) << 8) | u32::from(b3)
    } else if b0 == 0xF0 {
        reader.read_u32().await?
    } else {
        // 0xF1..=0xFF are reserved control bytes.
        return Err(Error::Protocol {
            message: format!("reserved length control byte 0x{b0:02x}"),
        });
    };

    if len > MAX_WORD_LEN {
        return Err(Error::Protocol {
            message: format!("word length {len} exceeds frame limit"),
        });
    }
    Ok(len)
}

// ── Sentence I/O ─────────────────────────────────────────────────────

/// Write one sentence (words + zero-length terminator) and flush.
pub async fn write_sentence<W, S>(writer: &mut W, words: &[S]) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
    S: AsRef<str>,
{
    let mut buf = BytesMut::new();
    for word in words {
        let bytes = word.as_ref().as_bytes();
        encode_length(&mut buf, bytes.len())?;
        buf.put_slice(bytes);
    }
    buf.put_u8(0); // sentence terminator

    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one full sentence. An unexpected zero-length sentence is a
/// framing error, not data.
pub async fn read_sentence<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Sentence, Error> {
    let mut words = Vec::new();
    loop {
        let len = read_length(reader).await?;
        if len == 0 {
            break;
        }
        let mut word = vec![0u8; len as usize];
        reader.read_exact(&mut word).await?;
        // A lossy decode here would rewrite item handles; a `.id` with
        // replacement characters makes a later remove miss its target.
        let word = String::from_utf8(word).map_err(|_| Error::Protocol {
            message: "non-UTF-8 word on the wire".into(),
        })?;
        words.push(word);
    }

    if words.is_empty() {
        return Err(Error::Protocol {
            message: "empty sentence on the wire".into(),
        });
    }
    Ok(Sentence { words })
}

// ── Sentence & reply model ───────────────────────────────────────────

/// A raw decoded sentence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    pub words: Vec<String>,
}

/// The control word opening a reply sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// `!re` — one data row.
    Data,
    /// `!done` — command finished.
    Done,
    /// `!trap` — command-level error.
    Trap,
    /// `!fatal` — connection-level error; the socket is dead.
    Fatal,
}

/// A parsed reply sentence.
#[derive(Debug, Clone)]
pub struct Reply {
    pub kind: ReplyKind,
    /// `=key=value` attribute words.
    pub attributes: HashMap<String, String>,
    /// Words carrying neither `=` nor `.tag=` prefixes (RouterOS sends
    /// the `!fatal` reason as a bare word).
    pub bare: Vec<String>,
}

impl Reply {
    /// The trap/fatal message, falling back through the places RouterOS
    /// puts it.
    pub fn message(&self) -> String {
        self.attributes
            .get("message")
            .cloned()
            .unwrap_or_else(|| self.bare.join(" "))
    }
}

impl Sentence {
    /// Parse this sentence as a reply.
    pub fn into_reply(self) -> Result<Reply, Error> {
        let mut words = self.words.into_iter();
        let first = words.next().ok_or_else(|| Error::Protocol {
            message: "empty sentence".into(),
        })?;

        let kind = match first.as_str() {
            "!re" => ReplyKind::Data,
            "!done" => ReplyKind::Done,
            "!trap" => ReplyKind::Trap,
            "!fatal" => ReplyKind::Fatal,
            other => {
                return Err(Error::Protocol {
                    message: format!("unknown reply word '{other}'"),
                });
            }
        };

        let mut attributes = HashMap::new();
        let mut bare = Vec::new();
        for word in words {
            if let Some(rest) = word.strip_prefix('=') {
                match rest.split_once('=') {
                    Some((key, value)) => {
                        attributes.insert(key.to_owned(), value.to_owned());
                    }
                    None => {
                        // `=key` with no value: present but empty.
                        attributes.insert(rest.to_owned(), String::new());
                    }
                }
            } else if word.starts_with(".tag=") {
                // Tags are only meaningful for pipelined commands,
                // which this client never issues.
            } else {
                bare.push(word);
            }
        }

        Ok(Reply {
            kind,
            attributes,
            bare,
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn encoded_prefix(len: usize) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_length(&mut buf, len).unwrap();
        buf.to_vec()
    }

    #[test]
    fn length_prefix_widths() {
        assert_eq!(encoded_prefix(0), vec![0x00]);
        assert_eq!(encoded_prefix(0x7F), vec![0x7F]);
        assert_eq!(encoded_prefix(0x80), vec![0x80, 0x80]);
        assert_eq!(encoded_prefix(0x3FFF), vec![0xBF, 0xFF]);
        assert_eq!(encoded_prefix(0x4000), vec![0xC0, 0x40, 0x00]);
        assert_eq!(encoded_prefix(0x1F_FFFF), vec![0xDF, 0xFF, 0xFF]);
        assert_eq!(encoded_prefix(0x20_0000), vec![0xE0, 0x20, 0x00, 0x00]);
        assert_eq!(
            encoded_prefix(0x1000_0000),
            vec![0xF0, 0x10, 0x00, 0x00, 0x00]
        );
    }

    #[tokio::test]
    async fn roundtrip_boundary_lengths() {
        for len in [0usize, 1, 0x7F, 0x80, 0x3FFF, 0x4000] {
            let mut buf = BytesMut::new();
            encode_length(&mut buf, len).unwrap();
            let frame = buf.to_vec();
            let mut reader = frame.as_slice();
            let decoded = read_length(&mut reader).await.unwrap();
            assert_eq!(decoded as usize, len, "length {len} did not roundtrip");
        }
    }

    #[tokio::test]
    async fn sentence_roundtrip() {
        let mut wire = Vec::new();
        write_sentence(&mut wire, &["/login", "=name=admin", "=password=pw"])
            .await
            .unwrap();

        let mut reader = wire.as_slice();
        let sentence = read_sentence(&mut reader).await.unwrap();
        assert_eq!(
            sentence.words,
            vec!["/login", "=name=admin", "=password=pw"]
        );
    }

    #[tokio::test]
    async fn non_utf8_word_is_protocol_error() {
        // Two-byte word of invalid UTF-8, then the sentence terminator.
        let wire = [0x02u8, 0xFF, 0xFE, 0x00];
        let mut reader = wire.as_slice();
        let err = read_sentence(&mut reader).await.unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[tokio::test]
    async fn reserved_control_byte_is_protocol_error() {
        let wire = [0xF8u8];
        let mut reader = wire.as_slice();
        let err = read_length(&mut reader).await.unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn parse_data_reply() {
        let sentence = Sentence {
            words: vec![
                "!re".into(),
                "=.id=*1".into(),
                "=user=vch-ab12".into(),
                "=uptime=1h2m".into(),
            ],
        };
        let reply = sentence.into_reply().unwrap();
        assert_eq!(reply.kind, ReplyKind::Data);
        assert_eq!(reply.attributes.get(".id").map(String::as_str), Some("*1"));
        assert_eq!(
            reply.attributes.get("user").map(String::as_str),
            Some("vch-ab12")
        );
    }

    #[test]
    fn parse_trap_with_category() {
        let sentence = Sentence {
            words: vec![
                "!trap".into(),
                "=category=missing".into(),
                "=message=no such item".into(),
            ],
        };
        let reply = sentence.into_reply().unwrap();
        assert_eq!(reply.kind, ReplyKind::Trap);
        assert_eq!(reply.message(), "no such item");
    }

    #[test]
    fn parse_fatal_bare_word() {
        let sentence = Sentence {
            words: vec!["!fatal".into(), "not logged in".into()],
        };
        let reply = sentence.into_reply().unwrap();
        assert_eq!(reply.kind, ReplyKind::Fatal);
        assert_eq!(reply.message(), "not logged in");
    }

    #[test]
    fn unknown_reply_word_is_protocol_error() {
        let sentence = Sentence {
            words: vec!["!weird".into()],
        };
        assert!(matches!(
            sentence.into_reply(),
            Err(Error::Protocol { .. })
        ));
    }
}

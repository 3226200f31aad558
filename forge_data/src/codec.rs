//! Little-endian encode/decode over `bytes` buffers, used by the node
//! cache records.

use bytes::{Buf, BufMut};

use forge_common::{Error, Result};

pub trait Encode {
    fn encode<B>(&self, buf: B)
    where
        B: BufMut;
}

pub trait Decode: Sized {
    fn decode<B>(buf: B) -> Result<Self>
    where
        B: Buf;
}

macro_rules! int_impls {
    ($($id:ident),* $(,)?) => {
        $(
            impl Encode for $id {
                #[inline]
                fn encode<B>(&self, mut buf: B)
                where
                    B: BufMut,
                {
                    buf.put_slice(&self.to_le_bytes());
                }
            }

            impl Decode for $id {
                #[inline]
                fn decode<B>(mut buf: B) -> Result<Self>
                where
                    B: Buf,
                {
                    const SIZE: usize = std::mem::size_of::<$id>();

                    if buf.remaining() < SIZE {
                        return Err(Error::EndOfStream);
                    }

                    let mut bytes = [0u8; SIZE];
                    buf.copy_to_slice(&mut bytes);
                    Ok(Self::from_le_bytes(bytes))
                }
            }
        )*
    };
}

int_impls! {
    u8,
    u16,
    u32,
    u64,
    i8,
    i16,
    i32,
    i64,
}

impl Encode for bool {
    fn encode<B>(&self, buf: B)
    where
        B: BufMut,
    {
        (*self as u8).encode(buf);
    }
}

impl Decode for bool {
    fn decode<B>(buf: B) -> Result<Self>
    where
        B: Buf,
    {
        match u8::decode(buf)? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(Error::MalformedFile),
        }
    }
}

impl Encode for str {
    fn encode<B>(&self, mut buf: B)
    where
        B: BufMut,
    {
        (self.len() as u64).encode(&mut buf);
        buf.put_slice(self.as_bytes());
    }
}

impl Encode for String {
    fn encode<B>(&self, buf: B)
    where
        B: BufMut,
    {
        self.as_str().encode(buf);
    }
}

impl Decode for String {
    fn decode<B>(mut buf: B) -> Result<Self>
    where
        B: Buf,
    {
        let bytes = Vec::<u8>::decode(&mut buf)?;
        String::from_utf8(bytes).map_err(|_| Error::InvalidUnicode)
    }
}

impl Encode for Vec<u8> {
    fn encode<B>(&self, mut buf: B)
    where
        B: BufMut,
    {
        (self.len() as u64).encode(&mut buf);
        buf.put_slice(self);
    }
}

impl Decode for Vec<u8> {
    fn decode<B>(mut buf: B) -> Result<Self>
    where
        B: Buf,
    {
        let len = u64::decode(&mut buf)? as usize;

        if buf.remaining() < len {
            return Err(Error::EndOfStream);
        }

        let mut bytes = vec![0u8; len];
        buf.copy_to_slice(&mut bytes);
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::{Decode, Encode};

    #[test]
    fn int_round_trip() {
        let mut buf = Vec::new();
        0xdead_beefu32.encode(&mut buf);
        (-7i64).encode(&mut buf);

        let mut slice = &buf[..];
        assert_eq!(u32::decode(&mut slice).unwrap(), 0xdead_beef);
        assert_eq!(i64::decode(&mut slice).unwrap(), -7);
        assert!(u8::decode(&mut slice).is_err());
    }

    #[test]
    fn string_round_trip() {
        let mut buf = Vec::new();
        "rpll/idx/root".encode(&mut buf);

        let decoded = String::decode(&buf[..]).unwrap();
        assert_eq!(decoded, "rpll/idx/root");
    }

    #[test]
    fn truncated_string_fails() {
        let mut buf = Vec::new();
        "hello".encode(&mut buf);
        buf.truncate(buf.len() - 2);

        assert!(String::decode(&buf[..]).is_err());
    }
}

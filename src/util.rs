use std::ops::RangeFrom;

use nom::bytes::complete::take;
use nom::error::{make_error, ErrorKind, ParseError};
use nom::number::complete::{be_u16, be_u24, be_u8};
use nom::{Err, IResult, InputIter, InputLength, Slice};

/// Big endian 48-bit unsigned integer.
pub fn be_u48<I, E: ParseError<I>>(input: I) -> IResult<I, u64, E>
where
    I: Slice<RangeFrom<usize>> + InputIter<Item = u8> + InputLength,
{
    let bound: usize = 6;

    if input.input_len() < bound {
        Err(Err::Error(make_error(input, ErrorKind::Eof)))
    } else {
        let mut res = 0u64;

        for byte in input.iter_elements().take(bound) {
            res = (res << 8) + byte as u64;
        }

        Ok((input.slice(bound..), res))
    }
}

/// Vector with an 8-bit length prefix.
pub fn opaque8(input: &[u8]) -> IResult<&[u8], &[u8]> {
    let (input, len) = be_u8(input)?;
    take(len as usize)(input)
}

/// Vector with a 16-bit length prefix.
pub fn opaque16(input: &[u8]) -> IResult<&[u8], &[u8]> {
    let (input, len) = be_u16(input)?;
    take(len as usize)(input)
}

/// Vector with a 24-bit length prefix.
pub fn opaque24(input: &[u8]) -> IResult<&[u8], &[u8]> {
    let (input, len) = be_u24(input)?;
    take(len as usize)(input)
}

/// Fail unless `input` is fully consumed.
pub fn all_consumed(input: &[u8]) -> IResult<&[u8], ()> {
    if input.is_empty() {
        Ok((input, ()))
    } else {
        Err(Err::Error(make_error(input, ErrorKind::Eof)))
    }
}

/// Constant-time slice equality. Length is not secret.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_u48() {
        let input = [0, 0, 0, 0, 1, 2, 9];
        let (rest, v) = be_u48::<_, nom::error::Error<&[u8]>>(&input[..]).unwrap();
        assert_eq!(v, 0x0102);
        assert_eq!(rest, &[9]);
    }

    #[test]
    fn opaque_vectors_respect_length() {
        let input = [0, 2, 0xAA, 0xBB, 0xCC];
        let (rest, v) = opaque16(&input).unwrap();
        assert_eq!(v, &[0xAA, 0xBB]);
        assert_eq!(rest, &[0xCC]);
        assert!(opaque8(&[5, 1, 2]).is_err());
    }

    #[test]
    fn ct_eq_compares() {
        assert!(ct_eq(b"abc", b"abc"));
        assert!(!ct_eq(b"abc", b"abd"));
        assert!(!ct_eq(b"abc", b"ab"));
    }
}

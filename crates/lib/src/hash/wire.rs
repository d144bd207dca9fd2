//! Primitive writes of the hashing protocol.
//!
//! Every write is a single lead byte, a variable-length integer or a raw
//! byte run:
//!
//! | value range          | encoding                                     |
//! |----------------------|----------------------------------------------|
//! | `0..128`             | one byte, the value itself                   |
//! | `-8192..=8191`       | `0x80 \| (x >> 8 & 0x3f)`, then `x & 0xff`  |
//! | anything else        | [`Lead::Integer`], then 4 big-endian bytes   |
//!
//! Lead bytes start at 200 so they never collide with a one-byte integer
//! or the first byte of a two-byte integer.

use sha1::{Digest, Sha1};

use super::engine::HashError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Lead {
  Real = 200,
  Nil,
  False,
  True,
  Fiber,
  Integer,
  String,
  Symbol,
  Keyword,
  Array,
  Tuple,
  Table,
  TableProto,
  Struct,
  Buffer,
  Function,
  Registry,
  Abstract,
  Reference,
  FuncEnvRef,
  FuncDefRef,
}

/// Destination of encoded bytes.
pub trait Sink {
  fn write(&mut self, bytes: &[u8]);
}

impl Sink for Sha1 {
  fn write(&mut self, bytes: &[u8]) {
    Digest::update(self, bytes);
  }
}

impl Sink for Vec<u8> {
  fn write(&mut self, bytes: &[u8]) {
    self.extend_from_slice(bytes);
  }
}

pub struct Encoder<S> {
  sink: S,
}

impl<S: Sink> Encoder<S> {
  pub fn new(sink: S) -> Self {
    Self { sink }
  }

  pub fn lead(&mut self, lead: Lead) {
    self.sink.write(&[lead as u8]);
  }

  pub fn bytes(&mut self, bytes: &[u8]) {
    self.sink.write(bytes);
  }

  pub fn int(&mut self, x: i32) {
    if (0..128).contains(&x) {
      self.sink.write(&[x as u8]);
    } else if (-8192..=8191).contains(&x) {
      self.sink.write(&[(((x >> 8) & 0x3F) | 0x80) as u8, (x & 0xFF) as u8]);
    } else {
      let be = x.to_be_bytes();
      self.sink.write(&[Lead::Integer as u8, be[0], be[1], be[2], be[3]]);
    }
  }

  /// Write a length or count, which must fit the signed 32-bit wire form.
  pub fn len(&mut self, n: usize) -> Result<(), HashError> {
    let n = i32::try_from(n).map_err(|_| HashError::LengthOverflow(n))?;
    self.int(n);
    Ok(())
  }

  pub fn into_inner(self) -> S {
    self.sink
  }
}

//! Post-compile stream optimization.
//!
//! [`optimize`] is a port of `pickletools.optimize`: it drops every
//! PUT-family opcode whose slot no GET ever fetches, renumbers the
//! surviving slots densely in stream order, and rewrites the GETs to
//! match. At protocol 4 and above the rewritten body is wrapped in
//! FRAME records the way `pickle` frames its own output.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::compiler::opcode;
use crate::stream::{self, OpArg, StreamError};

/// `pickle._Framer` frame sizing.
const FRAME_SIZE_TARGET: usize = 64 * 1024;
const FRAME_SIZE_MIN: usize = 4;

/// Accumulates output, optionally batching it into FRAME records.
struct Framer {
    out: Vec<u8>,
    frame: Option<Vec<u8>>,
}

impl Framer {
    fn new() -> Self {
        Self {
            out: Vec::new(),
            frame: None,
        }
    }

    fn start_framing(&mut self) {
        self.frame = Some(Vec::new());
    }

    /// Writes through the current frame, or straight out when framing
    /// is off.
    fn write(&mut self, data: &[u8]) {
        match &mut self.frame {
            Some(frame) => frame.extend_from_slice(data),
            None => self.out.extend_from_slice(data),
        }
    }

    /// Writes past the frame buffer. Oversized items get no frame of
    /// their own.
    fn write_direct(&mut self, data: &[u8]) {
        self.out.extend_from_slice(data);
    }

    /// Flushes the current frame once it reaches the target size, or
    /// unconditionally when forced. Frames shorter than the minimum
    /// are written without a FRAME header.
    fn commit_frame(&mut self, force: bool) {
        if let Some(frame) = &mut self.frame {
            if force || frame.len() >= FRAME_SIZE_TARGET {
                if frame.len() >= FRAME_SIZE_MIN {
                    self.out.push(opcode::FRAME);
                    self.out
                        .extend_from_slice(&(frame.len() as u64).to_le_bytes());
                }
                self.out.append(frame);
            }
        }
    }

    fn finish(mut self) -> Vec<u8> {
        if self.frame.as_ref().is_some_and(|frame| !frame.is_empty()) {
            self.commit_frame(true);
        }
        self.out
    }
}

enum Item {
    /// A PUT-family opcode storing this slot
    Put(u64),
    /// A GET-family opcode fetching this slot
    Get(u64),
    /// Anything else, copied verbatim from the input
    Copy(usize, usize),
}

fn parse_slot(line: &[u8], at: usize) -> Result<u64, StreamError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| StreamError::Malformed {
            message: format!("invalid memo index {:?}", String::from_utf8_lossy(line)),
            at,
        })
}

fn slot_arg(arg: &OpArg<'_>, at: usize) -> Result<u64, StreamError> {
    match arg {
        OpArg::Uint(slot) => Ok(*slot),
        OpArg::Line(line) => parse_slot(line, at),
        _ => Err(StreamError::Malformed {
            message: "memo opcode with a non-index argument".into(),
            at,
        }),
    }
}

fn encode_put(idx: u64, proto: u8) -> Vec<u8> {
    if proto >= 4 {
        vec![opcode::MEMOIZE]
    } else if proto >= 1 {
        if idx < 256 {
            vec![opcode::BINPUT, idx as u8]
        } else {
            let mut out = vec![opcode::LONG_BINPUT];
            out.extend_from_slice(&(idx as u32).to_le_bytes());
            out
        }
    } else {
        format!("p{idx}\n").into_bytes()
    }
}

fn encode_get(idx: u64, proto: u8) -> Vec<u8> {
    if proto >= 1 {
        if idx < 256 {
            vec![opcode::BINGET, idx as u8]
        } else {
            let mut out = vec![opcode::LONG_BINGET];
            out.extend_from_slice(&(idx as u32).to_le_bytes());
            out
        }
    } else {
        format!("g{idx}\n").into_bytes()
    }
}

/// Strips unread memo stores from a finished stream.
///
/// The result loads to the same value. Slots that survive keep their
/// stream order but are renumbered from zero, so MEMOIZE stays valid at
/// protocol 4. A GET fetching a slot the stream never stores is
/// reported as [`StreamError::UnboundSlot`].
pub fn optimize(data: &[u8]) -> Result<Vec<u8>, StreamError> {
    let mut stored: FxHashSet<u64> = FxHashSet::default();
    let mut fetched: FxHashSet<u64> = FxHashSet::default();
    let mut items = Vec::new();
    let mut preamble = None;
    let mut proto: u8 = 0;

    for op in stream::read_all(data)? {
        match op.info.code {
            opcode::PUT | opcode::BINPUT | opcode::LONG_BINPUT => {
                let slot = slot_arg(&op.arg, op.start)?;
                stored.insert(slot);
                items.push(Item::Put(slot));
            }
            opcode::MEMOIZE => {
                let slot = stored.len() as u64;
                stored.insert(slot);
                items.push(Item::Put(slot));
            }
            opcode::FRAME => {}
            opcode::GET | opcode::BINGET | opcode::LONG_BINGET => {
                let slot = slot_arg(&op.arg, op.start)?;
                fetched.insert(slot);
                proto = proto.max(op.info.proto);
                items.push(Item::Get(slot));
            }
            opcode::PROTO => {
                if let OpArg::Uint(version) = op.arg {
                    proto = proto.max(version as u8);
                }
                if op.start == 0 {
                    preamble = Some((op.start, op.end));
                } else {
                    items.push(Item::Copy(op.start, op.end));
                }
            }
            _ => {
                proto = proto.max(op.info.proto);
                items.push(Item::Copy(op.start, op.end));
            }
        }
    }

    let mut framer = Framer::new();
    if let Some((start, end)) = preamble {
        framer.write(&data[start..end]);
    }
    if proto >= 4 {
        framer.start_framing();
    }

    let mut renumbered: FxHashMap<u64, u64> = FxHashMap::default();
    for item in items {
        match item {
            Item::Put(slot) => {
                if !fetched.contains(&slot) {
                    continue;
                }
                let idx = renumbered.len() as u64;
                renumbered.insert(slot, idx);
                framer.commit_frame(false);
                framer.write(&encode_put(idx, proto));
            }
            Item::Get(slot) => {
                let idx = *renumbered
                    .get(&slot)
                    .ok_or(StreamError::UnboundSlot { slot })?;
                framer.commit_frame(false);
                framer.write(&encode_get(idx, proto));
            }
            Item::Copy(start, end) => {
                let bytes = &data[start..end];
                let frameless = bytes.len() > FRAME_SIZE_TARGET;
                framer.commit_frame(frameless);
                if frameless {
                    framer.write_direct(bytes);
                } else {
                    framer.write(bytes);
                }
            }
        }
    }
    Ok(framer.finish())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn framed(body: &[u8]) -> Vec<u8> {
        let mut out = vec![0x80, 0x04, 0x95];
        out.extend_from_slice(&(body.len() as u64).to_le_bytes());
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn test_drops_unread_puts() {
        let optimized = optimize(b"\x80\x04K\x01\x940h\x00\x940N.").unwrap();
        assert_eq!(optimized, framed(b"K\x01\x940h\x000N."));
    }

    #[test]
    fn test_renumbers_surviving_slots() {
        // Slot 1 is never fetched, so 2 and 3 shift down behind 0.
        let optimized =
            optimize(b"\x80\x04K\x01\x940h\x00\x940K\x02\x940h\x02\x940h\x03.").unwrap();
        assert_eq!(optimized, framed(b"K\x01\x940h\x000K\x02\x940h\x01\x940h\x02."));
    }

    #[test]
    fn test_rewrites_text_mode_puts() {
        let optimized = optimize(b"I1\np0\n0g0\np1\n0N.").unwrap();
        assert_eq!(optimized, b"I1\np0\n0g0\n0N.");
    }

    #[test]
    fn test_short_output_is_not_framed() {
        // The whole body is under the minimum frame size.
        assert_eq!(optimize(b"\x80\x04K\x01\x94.").unwrap(), b"\x80\x04K\x01.");
        assert_eq!(optimize(b"\x80\x04K*.").unwrap(), b"\x80\x04K*.");
    }

    #[test]
    fn test_unbound_slot() {
        assert_eq!(
            optimize(b"h\x05.").unwrap_err(),
            StreamError::UnboundSlot { slot: 5 }
        );
    }

    #[test]
    fn test_oversized_item_stays_frameless() {
        let mut input = vec![0x80, 0x04, b'X'];
        input.extend_from_slice(&70_000u32.to_le_bytes());
        input.extend(std::iter::repeat(b'a').take(70_000));
        input.push(b'.');
        assert_eq!(optimize(&input).unwrap(), input);
    }

    #[test]
    fn test_frame_splits_at_target_size() {
        let item = |fill: u8, len: u32| {
            let mut out = vec![b'X'];
            out.extend_from_slice(&len.to_le_bytes());
            out.extend(std::iter::repeat(fill).take(len as usize));
            out
        };
        let first = item(b'a', 40_000);
        let second = item(b'b', 30_000);
        let mut input = vec![0x80, 0x04];
        input.extend_from_slice(&first);
        input.extend_from_slice(&second);
        input.extend_from_slice(b"0N.");

        // The frame is committed once the buffer passes the target,
        // before the next item is written; the three trailing opcodes
        // fall below the minimum size for a header of their own.
        let mut body = first;
        body.extend_from_slice(&second);
        let mut expected = framed(&body);
        expected.extend_from_slice(b"0N.");

        assert_eq!(optimize(&input).unwrap(), expected);
    }

    #[test]
    fn test_idempotent() {
        let once = optimize(b"\x80\x04K\x01\x940h\x00\x940K\x02\x940h\x02\x940h\x03.").unwrap();
        assert_eq!(optimize(&once).unwrap(), once);
    }
}

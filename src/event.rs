//! Event types and the compact wire codec.
//!
//! Every simulated action is reported as an [`Event`] with a linear byte
//! encoding shared by the binary log, the KV store and the stream
//! publisher. The layout is little-endian and packed:
//!
//! ```text
//! | Offset | Size | Field                          |
//! |--------|------|--------------------------------|
//! | 0      | 2    | symbol length `sl` (u16)       |
//! | 2      | sl   | symbol bytes (UTF-8)           |
//! | 2+sl   | 8    | ts_ns (u64)                    |
//! | 10+sl  | 1    | type (1=ADD, 2=CANCEL, 3=TRADE)|
//! | 11+sl  | 8    | price (f64)                    |
//! | 19+sl  | 4    | qty (i32)                      |
//! | 23+sl  | 1    | side ('B' or 'S')              |
//! ```
//!
//! Total length `24 + sl`.

use std::fmt;

/// Order side. `'B'`/`'S'` on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Side {
    #[default]
    Buy = 0,
    Sell = 1,
}

impl Side {
    /// Returns the opposite side.
    #[inline]
    pub const fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    #[inline]
    pub const fn wire_byte(self) -> u8 {
        match self {
            Side::Buy => b'B',
            Side::Sell => b'S',
        }
    }

    #[inline]
    pub const fn from_wire_byte(b: u8) -> Option<Self> {
        match b {
            b'B' => Some(Side::Buy),
            b'S' => Some(Side::Sell),
            _ => None,
        }
    }
}

/// Event discriminant. Values match the wire encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum EventType {
    OrderAdd = 1,
    OrderCancel = 2,
    Trade = 3,
}

impl EventType {
    #[inline]
    pub const fn from_wire_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(EventType::OrderAdd),
            2 => Some(EventType::OrderCancel),
            3 => Some(EventType::Trade),
            _ => None,
        }
    }
}

/// A single simulated market event.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub ts_ns: u64,
    pub kind: EventType,
    pub symbol: String,
    pub price: f64,
    pub qty: i32,
    pub side: Side,
}

impl Event {
    /// Encoded length in bytes: `24 + symbol length`.
    #[inline]
    pub fn serialized_size(&self) -> usize {
        2 + self.symbol.len() + 8 + 1 + 8 + 4 + 1
    }

    /// Encode into the packed little-endian layout.
    ///
    /// Symbols longer than `u16::MAX` bytes are not representable and are
    /// rejected by a debug assertion.
    pub fn serialize(&self) -> Vec<u8> {
        debug_assert!(self.symbol.len() <= u16::MAX as usize);
        let sl = self.symbol.len() as u16;

        let mut out = Vec::with_capacity(self.serialized_size());
        out.extend_from_slice(&sl.to_le_bytes());
        out.extend_from_slice(self.symbol.as_bytes());
        out.extend_from_slice(&self.ts_ns.to_le_bytes());
        out.push(self.kind as u8);
        out.extend_from_slice(&self.price.to_le_bytes());
        out.extend_from_slice(&self.qty.to_le_bytes());
        out.push(self.side.wire_byte());
        out
    }

    /// Decode one event from the front of `data`.
    ///
    /// Returns the event and the number of bytes consumed, or `None` when
    /// the buffer is truncated or carries an unknown type or side byte.
    /// Never panics on foreign input.
    pub fn deserialize(data: &[u8]) -> Option<(Event, usize)> {
        if data.len() < 2 {
            return None;
        }
        let sl = u16::from_le_bytes([data[0], data[1]]) as usize;
        let total = 24 + sl;
        if data.len() < total {
            return None;
        }

        let mut off = 2;
        let symbol = String::from_utf8(data[off..off + sl].to_vec()).ok()?;
        off += sl;

        let ts_ns = u64::from_le_bytes(data[off..off + 8].try_into().unwrap());
        off += 8;
        let kind = EventType::from_wire_byte(data[off])?;
        off += 1;
        let price = f64::from_le_bytes(data[off..off + 8].try_into().unwrap());
        off += 8;
        let qty = i32::from_le_bytes(data[off..off + 4].try_into().unwrap());
        off += 4;
        let side = Side::from_wire_byte(data[off])?;
        off += 1;

        Some((
            Event {
                ts_ns,
                kind,
                symbol,
                price,
                qty,
                side,
            },
            off,
        ))
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.kind {
            EventType::OrderAdd => "ADD",
            EventType::OrderCancel => "CXL",
            EventType::Trade => "TRD",
        };
        write!(
            f,
            "[{}] {} {:.2} x {} ({}) t={}",
            tag,
            self.symbol,
            self.price,
            self.qty,
            self.side.wire_byte() as char,
            self.ts_ns
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Event {
        Event {
            ts_ns: 12345,
            kind: EventType::Trade,
            symbol: "MSFT".to_string(),
            price: 250.25,
            qty: 7,
            side: Side::Buy,
        }
    }

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }

    #[test]
    fn test_round_trip_msft_trade() {
        let e = sample();
        let bytes = e.serialize();
        assert_eq!(bytes.len(), 28);
        assert_eq!(bytes.len(), e.serialized_size());

        let (back, consumed) = Event::deserialize(&bytes).unwrap();
        assert_eq!(consumed, 28);
        assert_eq!(back, e);
    }

    #[test]
    fn test_wire_layout() {
        let e = sample();
        let bytes = e.serialize();

        assert_eq!(&bytes[0..2], &4u16.to_le_bytes());
        assert_eq!(&bytes[2..6], b"MSFT");
        assert_eq!(&bytes[6..14], &12345u64.to_le_bytes());
        assert_eq!(bytes[14], 3); // TRADE
        assert_eq!(&bytes[15..23], &250.25f64.to_le_bytes());
        assert_eq!(&bytes[23..27], &7i32.to_le_bytes());
        assert_eq!(bytes[27], b'B');
    }

    #[test]
    fn test_round_trip_all_kinds_and_sides() {
        for kind in [EventType::OrderAdd, EventType::OrderCancel, EventType::Trade] {
            for side in [Side::Buy, Side::Sell] {
                let e = Event {
                    ts_ns: u64::MAX,
                    kind,
                    symbol: "GOOG".to_string(),
                    price: -0.0,
                    qty: i32::MIN,
                    side,
                };
                let bytes = e.serialize();
                let (back, n) = Event::deserialize(&bytes).unwrap();
                assert_eq!(n, bytes.len());
                assert_eq!(back, e);
            }
        }
    }

    #[test]
    fn test_empty_symbol() {
        let e = Event {
            symbol: String::new(),
            ..sample()
        };
        let bytes = e.serialize();
        assert_eq!(bytes.len(), 24);
        let (back, _) = Event::deserialize(&bytes).unwrap();
        assert_eq!(back.symbol, "");
    }

    #[test]
    fn test_deserialize_truncated() {
        let bytes = sample().serialize();
        for n in 0..bytes.len() {
            assert!(Event::deserialize(&bytes[..n]).is_none(), "len {n}");
        }
    }

    #[test]
    fn test_deserialize_bad_type_byte() {
        let mut bytes = sample().serialize();
        bytes[14] = 9;
        assert!(Event::deserialize(&bytes).is_none());
    }

    #[test]
    fn test_deserialize_bad_side_byte() {
        let mut bytes = sample().serialize();
        bytes[27] = b'X';
        assert!(Event::deserialize(&bytes).is_none());
    }

    #[test]
    fn test_deserialize_trailing_bytes_ignored() {
        let mut bytes = sample().serialize();
        bytes.extend_from_slice(&[0xAA; 5]);
        let (_, consumed) = Event::deserialize(&bytes).unwrap();
        assert_eq!(consumed, 28);
    }
}

use std::mem::size_of;
use std::str;

use crate::Addr;


/// The number of hex digits in a formatted address.
const ADDR_DIGITS: usize = 2 * size_of::<Addr>();
/// The prefix of every formatted address.
const ADDR_PREFIX: &[u8] = b"    @ ";
const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

const _: () = assert!(ADDR_DIGITS <= 16);


/// Write `addr` as zero padded lower case hexadecimal number into
/// `digits`, filling it entirely.
pub(crate) fn write_hex(mut addr: Addr, digits: &mut [u8]) {
    for digit in digits.iter_mut().rev() {
        *digit = HEX_DIGITS[addr & 0xf];
        addr = addr.checked_shr(4).unwrap_or(0);
    }
}


/// A formatter for addresses, writing into an internal fixed size
/// buffer.
///
/// Addresses are formatted as `    @ ` followed by as many zero padded
/// hexadecimal digits as there are in the largest address. No heap
/// allocation is performed, making the formatter usable from within
/// signal handlers.
#[derive(Debug)]
pub struct AddressFormatter {
    buffer: [u8; ADDR_PREFIX.len() + ADDR_DIGITS],
}

impl AddressFormatter {
    /// Create a new [`AddressFormatter`].
    pub const fn new() -> Self {
        Self {
            buffer: [b'0'; ADDR_PREFIX.len() + ADDR_DIGITS],
        }
    }

    /// Format `addr`.
    ///
    /// The returned string borrows from the formatter and is valid
    /// until the next call.
    pub fn format(&mut self, addr: Addr) -> &str {
        let (prefix, digits) = self.buffer.split_at_mut(ADDR_PREFIX.len());
        let () = prefix.copy_from_slice(ADDR_PREFIX);
        let () = write_hex(addr, digits);
        // The buffer only ever contains ASCII characters.
        str::from_utf8(&self.buffer).unwrap_or_default()
    }
}

impl Default for AddressFormatter {
    fn default() -> Self {
        Self::new()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    use test_tag::tag;


    fn parse(formatted: &str) -> Addr {
        let digits = formatted.strip_prefix("    @ ").unwrap();
        assert_eq!(digits.len(), ADDR_DIGITS);
        Addr::from_str_radix(digits, 16).unwrap()
    }

    /// Check that formatted addresses can be parsed back.
    #[tag(miri)]
    #[test]
    fn address_round_trip() {
        let mut formatter = AddressFormatter::new();
        for addr in [0, 1, 0xf, 0x10, 0xdeadbeef, Addr::MAX / 2, Addr::MAX] {
            assert_eq!(parse(formatter.format(addr)), addr);
        }
    }

    /// Check that a formatted address does not carry over digits from a
    /// previous invocation.
    #[tag(miri)]
    #[test]
    fn digit_reset() {
        let mut formatter = AddressFormatter::default();
        let _formatted = formatter.format(Addr::MAX);
        let formatted = formatter.format(0x1);
        assert_eq!(&formatted[formatted.len() - 2..], "01");
        assert_eq!(parse(formatted), 1);
        assert_eq!(formatted.len(), ADDR_PREFIX.len() + ADDR_DIGITS);
    }

    /// Check the exact formatting of a 64 bit address.
    #[cfg(target_pointer_width = "64")]
    #[tag(miri)]
    #[test]
    fn formatting() {
        let mut formatter = AddressFormatter::new();
        assert_eq!(formatter.format(0x7f12abcd), "    @ 000000007f12abcd");
    }
}

/// Check an order number against the Luhn (mod 10) checksum.
///
/// Only ASCII digit strings can pass: empty input or any other character
/// yields `false`. Callers treat `false` as an ordinary rejection.
pub fn is_valid_order_number(number: &str) -> bool {
    if number.is_empty() {
        return false;
    }

    let mut sum = 0u32;
    // Walk from the rightmost digit; every second digit is doubled.
    for (position, byte) in number.bytes().rev().enumerate() {
        if !byte.is_ascii_digit() {
            return false;
        }
        let mut digit = u32::from(byte - b'0');
        if position % 2 == 1 {
            digit *= 2;
            if digit > 9 {
                digit -= 9;
            }
        }
        sum += digit;
    }

    sum % 10 == 0
}

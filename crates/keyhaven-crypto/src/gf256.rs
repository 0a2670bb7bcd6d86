//! Galois Field GF(256) arithmetic
//!
//! Elements are bytes. The field is defined by the irreducible polynomial
//! x^8 + x^4 + x^3 + x + 1 (0x11B). Multiplication, division and powers go through
//! EXP/LOG tables generated once from the generator 0x03, which has order 255.

use keyhaven_core::{KeyhavenError, KeyhavenResult};
use once_cell::sync::Lazy;

/// Low byte of the reduction polynomial 0x11B
const REDUCTION: u8 = 0x1B;

/// Generator of the multiplicative group
pub const GENERATOR: u8 = 0x03;

struct Tables {
    /// `exp[i] = g^i`, doubled so `exp[log a + log b]` never needs a modulo
    exp: [u8; 512],
    /// `log[g^i] = i`; `log[0]` is unused
    log: [u8; 256],
}

impl Tables {
    fn build() -> Self {
        let mut exp = [0u8; 512];
        let mut log = [0u8; 256];
        let mut x: u8 = 1;
        for i in 0..255 {
            exp[i] = x;
            log[x as usize] = i as u8;
            x = mul_slow(x, GENERATOR);
        }
        for i in 255..512 {
            exp[i] = exp[i - 255];
        }
        Self { exp, log }
    }
}

static TABLES: Lazy<Tables> = Lazy::new(Tables::build);

/// Carry-less multiply with reduction, used only to build the tables
fn mul_slow(mut a: u8, mut b: u8) -> u8 {
    let mut product = 0u8;
    while b != 0 {
        if b & 1 != 0 {
            product ^= a;
        }
        let carry = a & 0x80 != 0;
        a <<= 1;
        if carry {
            a ^= REDUCTION;
        }
        b >>= 1;
    }
    product
}

/// Add two elements (XOR)
#[inline]
pub fn add(a: u8, b: u8) -> u8 {
    a ^ b
}

/// Subtract two elements; identical to [`add`] in characteristic 2
#[inline]
pub fn sub(a: u8, b: u8) -> u8 {
    a ^ b
}

/// Multiply two elements
#[inline]
pub fn mul(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        return 0;
    }
    let t = &*TABLES;
    t.exp[t.log[a as usize] as usize + t.log[b as usize] as usize]
}

/// Divide `a` by `b`
pub fn div(a: u8, b: u8) -> KeyhavenResult<u8> {
    if b == 0 {
        return Err(KeyhavenError::DivisionByZero);
    }
    if a == 0 {
        return Ok(0);
    }
    let t = &*TABLES;
    Ok(t.exp[t.log[a as usize] as usize + 255 - t.log[b as usize] as usize])
}

/// Multiplicative inverse
pub fn inv(a: u8) -> KeyhavenResult<u8> {
    div(1, a)
}

/// Raise `a` to the power `e`; `pow(0, 0)` is 1
pub fn pow(a: u8, e: u32) -> u8 {
    if e == 0 {
        return 1;
    }
    if a == 0 {
        return 0;
    }
    let t = &*TABLES;
    let exponent = (t.log[a as usize] as u64 * e as u64) % 255;
    t.exp[exponent as usize]
}

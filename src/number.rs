// Arbitrary-precision numbers.
//
// A number carries its digits as a decimal together with the kind it
// was written in: an integer literal stays int, a float literal stays
// float, and equality is value equality regardless of representation.
// Integer division comes in two families: quo/rem truncate, div/mod
// floor (the remainder takes the sign of the divisor).

use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use num_traits::{FromPrimitive, Signed, ToPrimitive, Zero};

use crate::kind::Kind;

pub type Result<T> = core::result::Result<T, NumError>;

#[derive(Clone, Debug, PartialEq)]
pub enum NumError {
    DivByZero,
    NotAnInt,
    OutOfRange,
}

#[derive(Clone, Debug)]
pub struct Num {
    pub v: BigDecimal,
    pub k: Kind,
}

impl Num {
    pub fn int(i: i64) -> Num {
        Num { v: BigDecimal::from(i), k: Kind::Int }
    }

    pub fn float(f: f64) -> Num {
        let v = BigDecimal::from_f64(f).unwrap_or_else(BigDecimal::zero);
        Num { v, k: Kind::Float }
    }

    pub fn from_bigint(i: BigInt) -> Num {
        Num { v: BigDecimal::from(i), k: Kind::Int }
    }

    pub fn is_int(&self) -> bool {
        self.k == Kind::Int
    }

    // The integer payload, defined only for int-kinded values.
    pub fn as_bigint(&self) -> Result<BigInt> {
        if !self.v.is_integer() {
            return Err(NumError::NotAnInt);
        }
        let (digits, _) = self.v.with_scale(0).as_bigint_and_exponent();
        Ok(digits)
    }

    pub fn as_usize(&self) -> Result<usize> {
        self.as_bigint()?.to_usize().ok_or(NumError::OutOfRange)
    }

    pub fn as_i64(&self) -> Result<i64> {
        self.as_bigint()?.to_i64().ok_or(NumError::OutOfRange)
    }

    fn arith_kind(&self, other: &Num) -> Kind {
        if self.is_int() && other.is_int() {
            Kind::Int
        } else {
            Kind::Float
        }
    }

    pub fn add(&self, other: &Num) -> Num {
        Num { v: &self.v + &other.v, k: self.arith_kind(other) }
    }

    pub fn sub(&self, other: &Num) -> Num {
        Num { v: &self.v - &other.v, k: self.arith_kind(other) }
    }

    pub fn mul(&self, other: &Num) -> Num {
        Num { v: &self.v * &other.v, k: self.arith_kind(other) }
    }

    // `/` always produces a float.
    pub fn div(&self, other: &Num) -> Result<Num> {
        if other.v.is_zero() {
            return Err(NumError::DivByZero);
        }
        Ok(Num { v: &self.v / &other.v, k: Kind::Float })
    }

    pub fn neg(&self) -> Num {
        Num { v: -&self.v, k: self.k }
    }

    // Truncated division: the quotient rounds toward zero and the
    // remainder takes the sign of the dividend.
    pub fn quo(&self, other: &Num) -> Result<Num> {
        let (a, b) = (self.as_bigint()?, other.as_bigint()?);
        if b.is_zero() {
            return Err(NumError::DivByZero);
        }
        Ok(Num::from_bigint(a / b))
    }

    pub fn rem(&self, other: &Num) -> Result<Num> {
        let (a, b) = (self.as_bigint()?, other.as_bigint()?);
        if b.is_zero() {
            return Err(NumError::DivByZero);
        }
        Ok(Num::from_bigint(a % b))
    }

    // Floored division: the quotient rounds toward negative infinity
    // and the remainder takes the sign of the divisor.
    pub fn div_floor(&self, other: &Num) -> Result<Num> {
        let (a, b) = (self.as_bigint()?, other.as_bigint()?);
        if b.is_zero() {
            return Err(NumError::DivByZero);
        }
        let r = floor_rem(&a, &b);
        Ok(Num::from_bigint((a - r) / b))
    }

    pub fn mod_floor(&self, other: &Num) -> Result<Num> {
        let (a, b) = (self.as_bigint()?, other.as_bigint()?);
        if b.is_zero() {
            return Err(NumError::DivByZero);
        }
        Ok(Num::from_bigint(floor_rem(&a, &b)))
    }
}

fn floor_rem(a: &BigInt, b: &BigInt) -> BigInt {
    let r = a % b;
    if !r.is_zero() && (r.is_negative() != b.is_negative()) {
        r + b
    } else {
        r
    }
}

// Value equality: 1.0 == 1.
impl PartialEq for Num {
    fn eq(&self, other: &Num) -> bool {
        self.v == other.v
    }
}

impl PartialOrd for Num {
    fn partial_cmp(&self, other: &Num) -> Option<std::cmp::Ordering> {
        self.v.partial_cmp(&other.v)
    }
}

impl std::fmt::Display for Num {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn i(n: i64) -> Num {
        Num::int(n)
    }

    #[test]
    fn test_representation_blind_equality() {
        assert_eq!(Num::float(1.0), Num::int(1));
        assert_eq!(Num::float(0.5), Num::float(0.5));
        assert!(Num::float(1.5) != Num::int(1));
    }

    #[test]
    fn test_arith_kind() {
        assert!(i(1).add(&i(2)).is_int());
        assert!(!i(1).add(&Num::float(2.0)).is_int());
        assert!(!i(6).div(&i(2)).unwrap().is_int());
    }

    #[test]
    fn test_truncated_division() {
        assert_eq!(i(5).quo(&i(2)).unwrap(), i(2));
        assert_eq!(i(5).quo(&i(-2)).unwrap(), i(-2));
        assert_eq!(i(-5).quo(&i(2)).unwrap(), i(-2));
        assert_eq!(i(-5).quo(&i(-2)).unwrap(), i(2));
        assert_eq!(i(5).rem(&i(2)).unwrap(), i(1));
        assert_eq!(i(-5).rem(&i(2)).unwrap(), i(-1));
        assert_eq!(i(5).rem(&i(-2)).unwrap(), i(1));
    }

    #[test]
    fn test_floored_division() {
        assert_eq!(i(5).div_floor(&i(2)).unwrap(), i(2));
        assert_eq!(i(-5).div_floor(&i(2)).unwrap(), i(-3));
        assert_eq!(i(5).div_floor(&i(-2)).unwrap(), i(-3));
        assert_eq!(i(-5).mod_floor(&i(2)).unwrap(), i(1));
        assert_eq!(i(5).mod_floor(&i(-2)).unwrap(), i(-1));
        assert_eq!(i(-5).mod_floor(&i(-2)).unwrap(), i(-1));
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(i(1).div(&i(0)), Err(NumError::DivByZero));
        assert_eq!(i(1).quo(&i(0)), Err(NumError::DivByZero));
        assert_eq!(i(1).mod_floor(&i(0)), Err(NumError::DivByZero));
    }

    #[test]
    fn test_float_guard() {
        assert_eq!(Num::float(1.5).quo(&i(2)), Err(NumError::NotAnInt));
    }

    #[test]
    fn test_float_division_is_close() {
        let x = Num::float(2.0).div(&i(3)).unwrap().mul(&i(6));
        let f = x.v.to_f64().unwrap();
        assert!((f - 4.0).abs() < 1e-9);
    }
}

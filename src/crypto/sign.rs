/* This file is part of agora
 *
 * Copyright (C) 2023-2026 agora developers
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Deterministic asymmetric keypair derivation, signing and
//! verification. The same passphrase always yields the same key, so
//! an author can re-derive their identity on any host.

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{One, Zero};

use crate::{Error, Result};

/// Fixed public exponent
const PUBLIC_EXPONENT: u32 = 0x10001;

/// Bit length of each generated prime. The modulus is twice this,
/// and must stay wider than any message handed to [`sign`].
const PRIME_BITS: usize = 320;

/// Candidate steps allowed while searching for a single prime
const MAX_PRIME_STEPS: usize = 10_000;

/// Prime-pair retries allowed before key derivation is declared failed
const MAX_PAIR_ATTEMPTS: usize = 8;

/// Domain separation for the passphrase-derived seed stream
const KEY_CONTEXT: &str = "agora 2023-10-14 signing key seed";

/// Constant plaintext for the derivation round-trip check
const ROUNDTRIP_PROBE: &[u8] = b"all your gods are liquid";

/// Encoding alphabet for signatures and public key strings
const ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// A derived keypair. `n` doubles as the distributable public key
/// once encoded with [`PrivateKey::public_string`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrivateKey {
    /// Modulus
    n: BigUint,
    /// Private exponent
    d: BigUint,
}

impl PrivateKey {
    /// The distributable public key string.
    pub fn public_string(&self) -> String {
        encode64(&self.n)
    }
}

/// Deterministically derive a [`PrivateKey`] from a passphrase.
///
/// Prime candidates are read from a blake3 XOF stream keyed by the
/// passphrase, forced odd with the top two bits set, and advanced by
/// two until probable-prime. Both the per-prime search and the pair
/// retries are bounded; exhaustion is [`Error::KeyDerivation`], a
/// configuration/environment bug rather than a recoverable
/// per-request error.
pub fn derive_key(passphrase: &str) -> Result<PrivateKey> {
    let mut hasher = blake3::Hasher::new_derive_key(KEY_CONTEXT);
    hasher.update(passphrase.as_bytes());
    let mut seed = hasher.finalize_xof();

    let e = BigUint::from(PUBLIC_EXPONENT);

    for _ in 0..MAX_PAIR_ATTEMPTS {
        let p = generate_prime(&mut seed)?;
        let q = generate_prime(&mut seed)?;
        if p == q {
            continue
        }

        let n = &p * &q;
        let phi = (&p - 1u32) * (&q - 1u32);

        // e must be invertible mod phi, otherwise try the next pair
        let Some(d) = modinv(&e, &phi) else { continue };

        let key = PrivateKey { n, d };

        // Round-trip check with a constant plaintext before the key
        // is allowed out of this function.
        let probe_sig = sign(ROUNDTRIP_PROBE, &key);
        if verify(ROUNDTRIP_PROBE, &probe_sig, &key.public_string()) {
            return Ok(key)
        }
    }

    Err(Error::KeyDerivation)
}

/// Sign a message with the private exponent. The result is encoded
/// in the 64-character alphabet, zero-padded to the key's full
/// encoded width.
pub fn sign(message: &[u8], key: &PrivateKey) -> String {
    let m = message_int(message);
    let c = m.modpow(&key.d, &key.n);

    let width = encode64(&key.n).len();
    let mut out = encode64(&c);
    while out.len() < width {
        out.insert(0, ALPHABET[0] as char);
    }

    out
}

/// Verify a signature against a public key string. Returns false on
/// any malformed input.
pub fn verify(message: &[u8], signature: &str, public_key: &str) -> bool {
    let Some(n) = decode64(public_key) else { return false };

    // An implausibly large message cannot have been signed under
    // this modulus; reject before any modular exponentiation.
    if message.len() > n.bits().div_ceil(8) as usize {
        return false
    }

    let Some(c) = decode64(signature) else { return false };

    let e = BigUint::from(PUBLIC_EXPONENT);
    c.modpow(&e, &n) == message_int(message)
}

/// Canonical big-integer encoding of a message: byte order reversed
/// relative to network convention. Wire compatibility requires this
/// exact decoding.
fn message_int(message: &[u8]) -> BigUint {
    let mut bytes = message.to_vec();
    bytes.reverse();
    BigUint::from_bytes_be(&bytes)
}

/// Read a prime candidate from the seed stream and advance it by two
/// until probable-prime, within a bounded number of steps.
fn generate_prime(seed: &mut blake3::OutputReader) -> Result<BigUint> {
    let mut buf = [0u8; PRIME_BITS / 8];
    seed.fill(&mut buf);

    // Top two bits set so the prime product reaches full width,
    // lowest bit set so the candidate is odd.
    buf[0] |= 0xc0;
    buf[PRIME_BITS / 8 - 1] |= 0x01;

    let mut candidate = BigUint::from_bytes_be(&buf);
    for _ in 0..MAX_PRIME_STEPS {
        if is_probable_prime(&candidate) {
            return Ok(candidate)
        }
        candidate += 2u32;
    }

    Err(Error::KeyDerivation)
}

/// Miller-Rabin with a fixed witness set, preceded by trial division
/// against small primes. Deterministic on purpose: key derivation
/// must be reproducible across hosts.
fn is_probable_prime(n: &BigUint) -> bool {
    const WITNESSES: [u32; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];

    if *n < BigUint::from(2u32) {
        return false
    }

    for sp in small_primes() {
        let sp = BigUint::from(sp);
        if *n == sp {
            return true
        }
        if (n % &sp).is_zero() {
            return false
        }
    }

    let one = BigUint::one();
    let two = &one + &one;
    let n_minus_one = n - &one;

    // n - 1 = d * 2^r with d odd
    let mut d = n_minus_one.clone();
    let mut r = 0u32;
    while !d.bit(0) {
        d >>= 1;
        r += 1;
    }

    'witness: for w in WITNESSES {
        let a = BigUint::from(w);
        if &a >= n {
            continue
        }

        let mut x = a.modpow(&d, n);
        if x == one || x == n_minus_one {
            continue
        }

        for _ in 1..r {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'witness
            }
        }

        return false
    }

    true
}

/// Odd primes below 1000, for cheap candidate pruning.
fn small_primes() -> Vec<u32> {
    let mut sieve = [true; 1000];
    let mut primes = vec![];
    for i in 2..1000usize {
        if sieve[i] {
            primes.push(i as u32);
            let mut j = i * i;
            while j < 1000 {
                sieve[j] = false;
                j += i;
            }
        }
    }
    primes
}

/// Modular inverse via the extended Euclidean algorithm. None when
/// `a` is not invertible mod `m`.
fn modinv(a: &BigUint, m: &BigUint) -> Option<BigUint> {
    let m_int = BigInt::from(m.clone());
    let (mut old_r, mut r) = (BigInt::from(a.clone()), m_int.clone());
    let (mut old_s, mut s) = (BigInt::one(), BigInt::zero());

    while !r.is_zero() {
        let q = &old_r / &r;
        let next_r = &old_r - &q * &r;
        old_r = std::mem::replace(&mut r, next_r);
        let next_s = &old_s - &q * &s;
        old_s = std::mem::replace(&mut s, next_s);
    }

    if !old_r.is_one() {
        return None
    }

    let mut inv = old_s % &m_int;
    if inv.sign() == Sign::Minus {
        inv += &m_int;
    }

    inv.to_biguint()
}

fn encode64(x: &BigUint) -> String {
    if x.is_zero() {
        return (ALPHABET[0] as char).to_string()
    }

    let base = BigUint::from(64u32);
    let mut digits = vec![];
    let mut x = x.clone();
    while !x.is_zero() {
        let rem = (&x % &base).iter_u64_digits().next().unwrap_or(0) as usize;
        digits.push(ALPHABET[rem]);
        x /= &base;
    }

    digits.reverse();
    digits.iter().map(|&b| b as char).collect()
}

fn decode64(s: &str) -> Option<BigUint> {
    if s.is_empty() {
        return None
    }

    let mut x = BigUint::zero();
    for b in s.bytes() {
        let digit = ALPHABET.iter().position(|&a| a == b)?;
        x = x * 64u32 + digit as u32;
    }

    Some(x)
}

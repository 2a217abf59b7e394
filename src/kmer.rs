use anyhow::{ensure, Context, Result};
use num_traits::int::PrimInt;
use std::fmt;
use std::hash::Hash;
use std::ops::Index;
use std::str::FromStr;

/// A storage word holding packed 2-bit nucleotides.
pub trait Base: PrimInt + Hash + fmt::Debug + Send + Sync {
    /// Number of nucleotides one word holds.
    const SYMBOLS: usize;
    fn from_char(b: &u8) -> Option<Self>;
    fn to_char(self) -> u8;
    fn complement(self) -> Self;
}

macro_rules! impl_traits {
($($t:ty),+) => {$(
    impl Base for $t {
        const SYMBOLS: usize = <$t>::BITS as usize / 2;
        #[inline]
        fn from_char(b: &u8) -> Option<Self> {
            match b {
                b'A' | b'C' | b'G' | b'T' => Some(((b / 3 - 1) % 4) as $t),
                _ => None,
            }
        }
        #[inline]
        fn to_char(self) -> u8 {
            const BASE_CHARS: [u8; 4] = [b'A', b'C', b'G', b'T'];
            if self >= 4 {
                panic!("Invalid base")
            }
            BASE_CHARS[self as usize]
        }
        #[inline]
        fn complement(self) -> Self {
            3 - self
        }
    }
)*}}

impl_traits!(u8, u16, u32, u64, u128);

#[inline(always)]
fn symbol_mask<T: Base>() -> T {
    (T::one() << 2) - T::one()
}

pub fn is_nucl(b: u8) -> bool {
    matches!(b, b'A' | b'C' | b'G' | b'T')
}

/// Reverse complement of an ASCII nucleotide string. Non-nucleotide bytes are kept as is.
pub fn reverse_complement(nucls: &[u8]) -> Vec<u8> {
    nucls
        .iter()
        .rev()
        .map(|&b| match b {
            b'A' => b'T',
            b'C' => b'G',
            b'G' => b'C',
            b'T' => b'A',
            other => other,
        })
        .collect()
}

/// A nucleotide word of exactly `N` symbols, packed two bits per symbol into words of type `T`.
///
/// Symbol `i` lives in word `i / T::SYMBOLS`, least significant bits first. Bits past the
/// `N`th symbol are always zero, so the derived equality, ordering and hashing only ever
/// see the packed content.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Seq<const N: usize, T: Base = u64> {
    data: Box<[T]>,
}

impl<const N: usize, T: Base> Seq<N, T> {
    const WORDS: usize = (N + T::SYMBOLS - 1) / T::SYMBOLS;

    fn empty() -> Self {
        Self {
            data: vec![T::zero(); Self::WORDS].into_boxed_slice(),
        }
    }

    #[inline]
    fn set(&mut self, index: usize, base: T) {
        let shift = (index % T::SYMBOLS) * 2;
        let word = &mut self.data[index / T::SYMBOLS];
        *word = (*word & !(symbol_mask::<T>() << shift)) | (base << shift);
    }

    /// Packs exactly `N` nucleotides.
    pub fn from_chars(bytes: &[u8]) -> Result<Self> {
        ensure!(
            bytes.len() == N,
            "expected {} nucleotides, got {}",
            N,
            bytes.len()
        );
        Self::from_slice(bytes, 0)
    }

    /// Packs the `N` nucleotides starting at `offset`. Panics if the source is too short.
    pub fn from_slice<S>(source: &S, offset: usize) -> Result<Self>
    where
        S: Index<usize, Output = u8> + ?Sized,
    {
        let mut res = Self::empty();
        for i in 0..N {
            let b = source[offset + i];
            let base = T::from_char(&b)
                .with_context(|| format!("invalid nucleotide {:?} at {}", b as char, offset + i))?;
            res.set(i, base);
        }
        Ok(res)
    }

    /// Builds a value from the first `N` symbols yielded by `bases`.
    pub fn from_bases<I: IntoIterator<Item = T>>(bases: I) -> Self {
        let mut res = Self::empty();
        let mut len = 0;
        for (i, base) in bases.into_iter().take(N).enumerate() {
            debug_assert!(base <= symbol_mask());
            res.set(i, base);
            len += 1;
        }
        assert_eq!(len, N, "not enough bases");
        res
    }

    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        N
    }

    #[inline]
    pub fn get(&self, index: usize) -> T {
        assert!(index < N, "index {index} out of range for {N}-mer");
        (self.data[index / T::SYMBOLS] >> ((index % T::SYMBOLS) * 2)) & symbol_mask()
    }

    /// Drops the first symbol and appends `base` at the end, in place.
    pub fn push_back(&mut self, base: T) {
        let words = self.data.len();
        if words == 0 {
            return;
        }
        let top = T::SYMBOLS * 2 - 2;
        for i in 0..words - 1 {
            let carry = self.data[i + 1] & symbol_mask();
            self.data[i] = (self.data[i] >> 2) | (carry << top);
        }
        let last = ((N - 1) % T::SYMBOLS) * 2;
        self.data[words - 1] = (self.data[words - 1] >> 2) | (base << last);
    }

    /// Drops the last symbol and prepends `base` at the start, in place.
    pub fn push_front(&mut self, base: T) {
        let words = self.data.len();
        if words == 0 {
            return;
        }
        let top = T::SYMBOLS * 2 - 2;
        let mut carry = base;
        for word in self.data.iter_mut() {
            let next = (*word >> top) & symbol_mask();
            *word = (*word << 2) | carry;
            carry = next;
        }
        let used = N - (words - 1) * T::SYMBOLS;
        if used < T::SYMBOLS {
            let mask = (T::one() << (2 * used)) - T::one();
            self.data[words - 1] = self.data[words - 1] & mask;
        }
    }

    #[inline]
    pub fn append(&self, base: T) -> Self {
        let mut res = self.clone();
        res.push_back(base);
        res
    }

    #[inline]
    pub fn prepend(&self, base: T) -> Self {
        let mut res = self.clone();
        res.push_front(base);
        res
    }

    pub fn append_char(&self, c: u8) -> Result<Self> {
        let base = T::from_char(&c).with_context(|| format!("invalid nucleotide {:?}", c as char))?;
        Ok(self.append(base))
    }

    pub fn prepend_char(&self, c: u8) -> Result<Self> {
        let base = T::from_char(&c).with_context(|| format!("invalid nucleotide {:?}", c as char))?;
        Ok(self.prepend(base))
    }

    pub fn rev_comp(&self) -> Self {
        let mut res = Self::empty();
        for i in 0..N {
            res.set(N - 1 - i, self.get(i).complement());
        }
        res
    }

    pub fn canonical(self) -> Self {
        let rc = self.rev_comp();
        if self <= rc {
            self
        } else {
            rc
        }
    }

    pub fn head<const M: usize>(&self) -> Seq<M, T> {
        assert!(M <= N, "head of {M} symbols from a {N}-mer");
        Seq::from_bases((0..M).map(|i| self.get(i)))
    }

    pub fn tail<const M: usize>(&self) -> Seq<M, T> {
        assert!(M <= N, "tail of {M} symbols from a {N}-mer");
        Seq::from_bases((N - M..N).map(|i| self.get(i)))
    }

    pub fn to_chars(&self) -> Vec<u8> {
        (0..N).map(|i| self.get(i).to_char()).collect()
    }

    /// Iterates over every `N`-mer of `bytes`. Whitespace is skipped and any other
    /// non-nucleotide byte restarts the window.
    pub fn iter_from_chars<'a, I>(bytes: I) -> KmerIterator<N, T, I::IntoIter>
    where
        I: IntoIterator<Item = &'a u8>,
    {
        KmerIterator {
            kmer: Self::empty(),
            filled: 0,
            bytes: bytes.into_iter(),
        }
    }
}

impl<const N: usize, T: Base> fmt::Display for Seq<N, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in 0..N {
            write!(f, "{}", self.get(i).to_char() as char)?;
        }
        Ok(())
    }
}

impl<const N: usize, T: Base> fmt::Debug for Seq<N, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seq<{N}>({self})")
    }
}

impl<const N: usize, T: Base> FromStr for Seq<N, T> {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_chars(s.as_bytes())
    }
}

pub struct KmerIterator<const K: usize, T: Base, I> {
    kmer: Seq<K, T>,
    filled: usize,
    bytes: I,
}

impl<'a, const K: usize, T, I> Iterator for KmerIterator<K, T, I>
where
    T: Base,
    I: Iterator<Item = &'a u8>,
{
    type Item = Seq<K, T>;
    fn next(&mut self) -> Option<Self::Item> {
        for b in self.bytes.by_ref() {
            if b.is_ascii_whitespace() {
                continue;
            }
            match T::from_char(b) {
                Some(base) => {
                    self.kmer.push_back(base);
                    if self.filled < K {
                        self.filled += 1;
                    }
                    if self.filled == K {
                        return Some(self.kmer.clone());
                    }
                }
                None => self.filled = 0,
            }
        }
        None
    }
}

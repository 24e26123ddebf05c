//! Rabin-Karp rolling hash boundary detection.
//!
//! A polynomial hash is kept over the last [`WINDOW`] bytes. A boundary is
//! declared once at least `min_size` bytes have been consumed since the last
//! one and `hash % avg_size == 1`. Reaching `max_size` forces a boundary.
//!
//! The window keeps rolling across boundaries, so the hash at any position
//! only depends on the preceding [`WINDOW`] bytes. An insertion early in a
//! file therefore stops affecting boundary placement a window later, and the
//! remaining pieces keep their content addresses.

/// Sliding window length in bytes.
pub const WINDOW: usize = 48;

/// Polynomial base of the rolling hash.
pub const PRIME: u32 = 31;

/// `PRIME^(WINDOW - 1)`, the weight of the byte leaving the window.
const fn leading_weight() -> u32 {
    let mut weight = 1u32;
    let mut i = 1;
    while i < WINDOW {
        weight = weight.wrapping_mul(PRIME);
        i += 1;
    }
    weight
}

const LEADING_WEIGHT: u32 = leading_weight();

/// Rolling hash state.
///
/// # Example
///
/// ```ignore
/// let mut cdc = RabinKarp::new(64, 256, 1024);
///
/// for byte in data {
///     if cdc.update(byte) {
///         println!("Boundary found!");
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RabinKarp {
    hash: u32,
    window: [u8; WINDOW],
    cursor: usize,
    filled: usize,
    min_size: usize,
    avg_size: usize,
    max_size: usize,
    bytes_since_boundary: usize,
}

impl RabinKarp {
    /// Creates a new state with the given size constraints.
    ///
    /// `avg_size` is clamped to at least 2 so the boundary test can match.
    pub fn new(min_size: usize, avg_size: usize, max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            hash: 0,
            window: [0; WINDOW],
            cursor: 0,
            filled: 0,
            min_size: min_size.min(max_size),
            avg_size: avg_size.max(2),
            max_size,
            bytes_since_boundary: 0,
        }
    }

    /// Resets the state for a new input.
    pub fn reset(&mut self) {
        self.hash = 0;
        self.window = [0; WINDOW];
        self.cursor = 0;
        self.filled = 0;
        self.bytes_since_boundary = 0;
    }

    /// Processes a single byte and returns true if a boundary falls after it.
    pub fn update(&mut self, byte: u8) -> bool {
        if self.filled == WINDOW {
            let leaving = u32::from(self.window[self.cursor]);
            self.hash = self.hash.wrapping_sub(leaving.wrapping_mul(LEADING_WEIGHT));
        } else {
            self.filled += 1;
        }
        self.hash = self
            .hash
            .wrapping_mul(PRIME)
            .wrapping_add(u32::from(byte));
        self.window[self.cursor] = byte;
        self.cursor = (self.cursor + 1) % WINDOW;

        self.bytes_since_boundary += 1;
        if self.bytes_since_boundary >= self.max_size {
            self.bytes_since_boundary = 0;
            return true;
        }
        if self.bytes_since_boundary < self.min_size {
            return false;
        }
        if self.hash as usize % self.avg_size == 1 {
            self.bytes_since_boundary = 0;
            true
        } else {
            false
        }
    }

    /// Forgets the bytes consumed since the last boundary without touching
    /// the window.
    pub fn mark_boundary(&mut self) {
        self.bytes_since_boundary = 0;
    }

    /// Returns the number of bytes since the last boundary.
    pub fn bytes_since_boundary(&self) -> usize {
        self.bytes_since_boundary
    }

    /// Returns the maximum size.
    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

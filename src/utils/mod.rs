//! Utility Module
//!
//! - [`interner`]: String interning for define and uniform names
//!
//! ```rust,ignore
//! use lustre::utils::interner;
//!
//! let sym1 = interner::intern("SSR_STEP_COUNT");
//! let sym2 = interner::intern("SSR_STEP_COUNT");
//! assert_eq!(sym1, sym2); // O(1) comparison
//! ```

pub mod interner;

pub use interner::Symbol;

// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Boot image loading interface.
//!
//! Parsing executable formats and copying segments is done by an external
//! loader. The child manager only needs the entry point and the address
//! ranges the image occupies, so it can keep them out of the domain's
//! allocatable address space.

use alloc::vec::Vec;

use crate::Error;

/// A segment the loader placed in the new domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Virtual address of the segment in the domain.
    pub vaddr: u64,
    /// Size in memory.
    pub size: u64,
}

/// Result of loading an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedImage {
    /// Initial instruction pointer.
    pub entry: u64,
    /// Segments occupied by the image.
    pub segments: Vec<Segment>,
}

/// External image loader.
pub trait ImageLoader: Send + Sync {
    /// Prepares the image at `[base, base + size)` for execution.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidImage`] if the image is not in a loadable format.
    fn load(&self, base: u64, size: u64, cmdline: &str) -> Result<LoadedImage, Error>;
}

#[cfg(any(test, feature = "std"))]
pub use mock::MockLoader;

#[cfg(any(test, feature = "std"))]
mod mock {
    use alloc::collections::BTreeMap;
    use alloc::vec;

    use spin::Mutex;

    use super::{Error, ImageLoader, LoadedImage, Segment};

    /// Loader that knows a fixed set of images by base address.
    ///
    /// Every other address is an invalid image.
    #[derive(Default)]
    pub struct MockLoader {
        images: Mutex<BTreeMap<u64, LoadedImage>>,
    }

    impl MockLoader {
        /// Creates a loader without images.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Adds an image at `base` with one code segment at `entry`.
        pub fn add(&self, base: u64, entry: u64) {
            self.add_image(
                base,
                LoadedImage {
                    entry,
                    segments: vec![Segment {
                        vaddr: entry & !(nre_abi::PAGE_SIZE - 1),
                        size: nre_abi::PAGE_SIZE,
                    }],
                },
            );
        }

        /// Adds an image with explicit segments.
        pub fn add_image(&self, base: u64, image: LoadedImage) {
            self.images.lock().insert(base, image);
        }
    }

    impl ImageLoader for MockLoader {
        fn load(&self, base: u64, _size: u64, _cmdline: &str) -> Result<LoadedImage, Error> {
            self.images
                .lock()
                .get(&base)
                .cloned()
                .ok_or(Error::InvalidImage)
        }
    }
}

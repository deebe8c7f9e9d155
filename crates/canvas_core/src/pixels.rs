//! Renderer-resident pixel buffers.
//!
//! Scripts manipulate image data through opaque numeric handles; per-pixel
//! reads and writes cross the bridge individually and complete in O(1)
//! against the resident buffer. Whole buffers are only marshaled when a
//! frame batch crosses a serialization boundary (see `render::WireTarget`).

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    /// RGBA8, row-major.
    pub data: Vec<u8>,
}

impl PixelBuffer {
    fn new(width: u32, height: u32) -> Self {
        Self { width, height, data: vec![0; (width as usize) * (height as usize) * 4] }
    }

    fn index(&self, x: u32, y: u32) -> Option<usize> {
        if x < self.width && y < self.height {
            Some(((y as usize) * (self.width as usize) + x as usize) * 4)
        } else {
            None
        }
    }
}

#[derive(Debug, Default)]
pub struct PixelStore {
    buffers: HashMap<u32, PixelBuffer>,
    next_handle: u32,
}

impl PixelStore {
    pub fn new() -> Self {
        Self { buffers: HashMap::new(), next_handle: 1 }
    }

    /// Allocate a zeroed (transparent black) buffer and return its handle.
    pub fn create(&mut self, width: u32, height: u32) -> u32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.buffers.insert(handle, PixelBuffer::new(width, height));
        tracing::debug!("Created pixel buffer {} ({}x{})", handle, width, height);
        handle
    }

    /// Wrap decoded RGBA bytes (e.g. an image asset region) in a new buffer.
    pub fn create_from_rgba(&mut self, width: u32, height: u32, data: Vec<u8>) -> anyhow::Result<u32> {
        if data.len() != (width as usize) * (height as usize) * 4 {
            anyhow::bail!(
                "pixel data length {} does not match {}x{} RGBA",
                data.len(),
                width,
                height
            );
        }
        let handle = self.next_handle;
        self.next_handle += 1;
        self.buffers.insert(handle, PixelBuffer { width, height, data });
        Ok(handle)
    }

    /// Copy a region of an existing buffer into a new buffer. Out-of-range
    /// pixels read as transparent black, as on the 2D context.
    pub fn copy_region(&mut self, handle: u32, x: i64, y: i64, width: u32, height: u32) -> Option<u32> {
        let src = self.buffers.get(&handle)?.clone();
        let mut dst = PixelBuffer::new(width, height);
        for row in 0..height {
            for col in 0..width {
                let sx = x + col as i64;
                let sy = y + row as i64;
                if sx < 0 || sy < 0 {
                    continue;
                }
                if let Some(si) = src.index(sx as u32, sy as u32) {
                    let di = dst.index(col, row).unwrap();
                    dst.data[di..di + 4].copy_from_slice(&src.data[si..si + 4]);
                }
            }
        }
        let out = self.next_handle;
        self.next_handle += 1;
        self.buffers.insert(out, dst);
        Some(out)
    }

    pub fn dimensions(&self, handle: u32) -> Option<(u32, u32)> {
        self.buffers.get(&handle).map(|b| (b.width, b.height))
    }

    /// O(1) pixel read. None for unknown handles or out-of-range coordinates.
    pub fn get_pixel(&self, handle: u32, x: u32, y: u32) -> Option<[u8; 4]> {
        let buf = self.buffers.get(&handle)?;
        let i = buf.index(x, y)?;
        Some([buf.data[i], buf.data[i + 1], buf.data[i + 2], buf.data[i + 3]])
    }

    /// O(1) pixel write. False for unknown handles or out-of-range coordinates.
    pub fn set_pixel(&mut self, handle: u32, x: u32, y: u32, rgba: [u8; 4]) -> bool {
        let Some(buf) = self.buffers.get_mut(&handle) else {
            return false;
        };
        let Some(i) = buf.index(x, y) else {
            return false;
        };
        buf.data[i..i + 4].copy_from_slice(&rgba);
        true
    }

    pub fn get(&self, handle: u32) -> Option<&PixelBuffer> {
        self.buffers.get(&handle)
    }

    pub fn release(&mut self, handle: u32) -> bool {
        self.buffers.remove(&handle).is_some()
    }

    /// Install a buffer under a caller-chosen handle. Used by wire
    /// receivers to mirror the sending side's handle space.
    pub fn insert_at(&mut self, handle: u32, width: u32, height: u32, data: Vec<u8>) {
        self.buffers.insert(handle, PixelBuffer { width, height, data });
        if handle >= self.next_handle {
            self.next_handle = handle + 1;
        }
    }

    /// Handles with their buffers, for wire serialization at flush time.
    pub fn snapshot(&self) -> Vec<(u32, &PixelBuffer)> {
        let mut entries: Vec<_> = self.buffers.iter().map(|(h, b)| (*h, b)).collect();
        entries.sort_by_key(|(h, _)| *h);
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_poke_pixels() {
        let mut store = PixelStore::new();
        let h = store.create(4, 4);
        assert_eq!(store.dimensions(h), Some((4, 4)));
        assert_eq!(store.get_pixel(h, 0, 0), Some([0, 0, 0, 0]));
        assert!(store.set_pixel(h, 3, 3, [1, 2, 3, 4]));
        assert_eq!(store.get_pixel(h, 3, 3), Some([1, 2, 3, 4]));
        assert!(!store.set_pixel(h, 4, 0, [0; 4]));
        assert_eq!(store.get_pixel(h, 0, 4), None);
    }

    #[test]
    fn region_copy_clips_to_source() {
        let mut store = PixelStore::new();
        let h = store.create(2, 2);
        store.set_pixel(h, 1, 1, [9, 9, 9, 9]);
        let region = store.copy_region(h, 1, 1, 2, 2).unwrap();
        assert_eq!(store.get_pixel(region, 0, 0), Some([9, 9, 9, 9]));
        // Outside the source reads as transparent black
        assert_eq!(store.get_pixel(region, 1, 1), Some([0, 0, 0, 0]));
    }

    #[test]
    fn unknown_handle_is_none() {
        let store = PixelStore::new();
        assert_eq!(store.get_pixel(42, 0, 0), None);
        assert_eq!(store.dimensions(42), None);
    }
}

//! Image decoding and manipulation.
//!
//! [`Image`] is an owned 8-bit sRGB image with 3 color channels. Training images read from disk
//! and uploaded request bodies go through the same decoder ([`Image::decode`]), so both sides of
//! the pipeline see identical pixels for identical bytes.

use std::{fmt, io::Cursor, path::Path};

use image::{imageops::FilterType, ImageOutputFormat, Rgb, RgbImage};

use crate::{
    error::{CorpusReadError, DecodeError},
    rect::Rect,
};

/// Resolution (`width x height`) of an image.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    width: u32,
    height: u32,
}

impl Resolution {
    /// Creates a new [`Resolution`] of `width x height`.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns the width of this [`Resolution`].
    #[inline]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Returns the height of this [`Resolution`].
    #[inline]
    pub const fn height(&self) -> u32 {
        self.height
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// An 8-bit sRGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color(pub [u8; 3]);

impl Color {
    pub const BLACK: Self = Self([0, 0, 0]);
    pub const WHITE: Self = Self([255, 255, 255]);
    pub const RED: Self = Self([255, 0, 0]);

    #[inline]
    pub const fn from_rgb8(r: u8, g: u8, b: u8) -> Self {
        Self([r, g, b])
    }

    #[inline]
    pub fn r(&self) -> u8 {
        self.0[0]
    }

    #[inline]
    pub fn g(&self) -> u8 {
        self.0[1]
    }

    #[inline]
    pub fn b(&self) -> u8 {
        self.0[2]
    }
}

/// An 8-bit sRGB image without alpha channel.
#[derive(Clone)]
pub struct Image {
    buf: RgbImage,
}

impl Image {
    /// Loads and decodes an image file.
    ///
    /// The format is determined from the file contents, not its extension.
    pub fn load<A: AsRef<Path>>(path: A) -> Result<Self, CorpusReadError> {
        Self::load_impl(path.as_ref())
    }

    fn load_impl(path: &Path) -> Result<Self, CorpusReadError> {
        let data = std::fs::read(path).map_err(|source| CorpusReadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::decode(&data).map_err(|source| CorpusReadError::Decode {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Decodes a compressed image (JPEG or PNG) from a byte slice.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let buf = image::load_from_memory(data)?.to_rgb8();
        Ok(Self { buf })
    }

    /// Creates an empty image of a specified size.
    ///
    /// The image will start out black.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            buf: RgbImage::new(width, height),
        }
    }

    /// Creates an image by calling `f` for every pixel coordinate.
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> Color) -> Self {
        Self {
            buf: RgbImage::from_fn(width, height, |x, y| Rgb(f(x, y).0)),
        }
    }

    /// Encodes `self` as PNG.
    pub fn encode_png(&self) -> anyhow::Result<Vec<u8>> {
        let mut out = Cursor::new(Vec::new());
        self.buf.write_to(&mut out, ImageOutputFormat::Png)?;
        Ok(out.into_inner())
    }

    /// Saves an image to the file system.
    ///
    /// The format is chosen based on the file extension (`jpeg`, `jpg` or `png`).
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        Ok(self.buf.save(path.as_ref())?)
    }

    /// Returns the width of this image, in pixels.
    #[inline]
    pub fn width(&self) -> u32 {
        self.buf.width()
    }

    /// Returns the height of this image, in pixels.
    #[inline]
    pub fn height(&self) -> u32 {
        self.buf.height()
    }

    /// Returns the size of this image.
    #[inline]
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width(), self.height())
    }

    /// Gets the image color at the given pixel coordinates.
    ///
    /// # Panics
    ///
    /// This will panic if `(x, y)` is outside the bounds of this image.
    #[inline]
    pub fn get(&self, x: u32, y: u32) -> Color {
        Color(self.buf[(x, y)].0)
    }

    /// Returns a copy of `self`, stretched or shrunk to `res` with bilinear filtering.
    ///
    /// The aspect ratio is not preserved.
    pub fn resize(&self, res: Resolution) -> Image {
        if self.resolution() == res {
            return self.clone();
        }
        Image {
            buf: image::imageops::resize(&self.buf, res.width(), res.height(), FilterType::Triangle),
        }
    }

    /// Copies the area covered by `rect` into a new image.
    ///
    /// `rect` may lie partially or entirely outside of `self`; those pixels are black. The result
    /// has the size of `rect`, rounded to whole pixels (at least 1x1).
    pub fn crop(&self, rect: Rect) -> Image {
        let x0 = rect.x().round() as i64;
        let y0 = rect.y().round() as i64;
        let w = (rect.width().round() as u32).max(1);
        let h = (rect.height().round() as u32).max(1);

        Image::from_fn(w, h, |x, y| {
            let sx = x0 + i64::from(x);
            let sy = y0 + i64::from(y);
            if sx < 0 || sy < 0 || sx >= i64::from(self.width()) || sy >= i64::from(self.height())
            {
                Color::BLACK
            } else {
                self.get(sx as u32, sy as u32)
            }
        })
    }

    /// Returns the raw RGB bytes of this image, row by row.
    #[inline]
    pub fn data(&self) -> &[u8] {
        self.buf.as_raw()
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} Image", self.width(), self.height())
    }
}

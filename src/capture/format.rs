use std::fmt;

use serde::{Deserialize, Serialize};

/// Pixel formats we negotiate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
    Yuyv4,
    Mjpeg,
    Nv12,
}

impl PixelFormat {
    /// V4L2 fourcc code
    pub fn fourcc(self) -> [u8; 4] {
        match self {
            PixelFormat::Rgb24 => *b"RGB3",
            PixelFormat::Bgr24 => *b"BGR3",
            PixelFormat::Yuyv4 => *b"YUYV",
            PixelFormat::Mjpeg => *b"MJPG",
            PixelFormat::Nv12 => *b"NV12",
        }
    }

    /// Bytes needed for one frame. MJPEG is sized for the worst case.
    pub fn frame_size(self, size: Size) -> usize {
        let pixels = size.width as usize * size.height as usize;
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 | PixelFormat::Mjpeg => pixels * 3,
            PixelFormat::Yuyv4 => pixels * 2,
            PixelFormat::Nv12 => pixels * 3 / 2,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.fourcc();
        f.write_str(&String::from_utf8_lossy(&code))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_sizes() {
        let vga = Size::new(640, 480);
        assert_eq!(PixelFormat::Rgb24.frame_size(vga), 921_600);
        assert_eq!(PixelFormat::Yuyv4.frame_size(vga), 614_400);
        assert_eq!(PixelFormat::Nv12.frame_size(vga), 460_800);
    }

    #[test]
    fn display_uses_fourcc() {
        assert_eq!(PixelFormat::Rgb24.to_string(), "RGB3");
        assert_eq!(Size::new(1280, 720).to_string(), "1280x720");
    }
}

//! Resolution and viewport planning.
//!
//! Given a resolution-independent viewport (`view_left/top/width/height` in
//! `[0, 1]`) and an optional requested pixel size, `View` picks the smallest
//! pyramid level that still covers the request, then derives pixel
//! offsets/dimensions on that level's canvas.

use crate::error::ViewError;

/// Flip orientation requested for the output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flip {
    None,
    Horizontal,
    Vertical,
}

/// Colour map applied to single-channel images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Colormap {
    Hot,
    Cold,
    Jet,
    Blue,
    Green,
    Red,
}

/// Resolution-independent viewport plus every per-request transform
/// parameter.
#[derive(Debug, Clone)]
pub struct View {
    view_left: f64,
    view_top: f64,
    view_width: f64,
    view_height: f64,

    resolution: i64,
    max_resolutions: u32,
    width: u32,
    height: u32,
    res_width: u32,
    res_height: u32,
    min_size: u32,
    max_size: i64,
    requested_width: u32,
    requested_height: u32,

    pub rotation: f64,
    pub h_angle: i32,
    pub v_angle: i32,
    pub shaded: bool,
    pub shade: [i32; 3],
    pub cmapped: bool,
    pub cmap: Colormap,
    pub inverted: bool,
    pub max_layers: i32,
    pub layers: i32,
    pub ctw: Vec<Vec<f32>>,
    pub flip: Flip,
    pub maintain_aspect: bool,
    pub allow_upscaling: bool,
    pub max_icc: i32,
    pub contrast: f32,
    pub gamma: f32,
    pub convolution: Vec<f32>,
    pub equalization: bool,
    pub minmax: bool,
    pub greyscale: bool,
}

impl Default for View {
    fn default() -> Self {
        Self {
            view_left: 0.0,
            view_top: 0.0,
            view_width: 1.0,
            view_height: 1.0,
            resolution: 0,
            max_resolutions: 0,
            width: 0,
            height: 0,
            res_width: 0,
            res_height: 0,
            min_size: 1,
            max_size: 0,
            requested_width: 0,
            requested_height: 0,
            rotation: 0.0,
            h_angle: 0,
            v_angle: 90,
            shaded: false,
            shade: [0, 0, 0],
            cmapped: false,
            cmap: Colormap::Hot,
            inverted: false,
            max_layers: 0,
            layers: 0,
            ctw: Vec::new(),
            flip: Flip::None,
            maintain_aspect: true,
            allow_upscaling: true,
            max_icc: -1,
            contrast: 1.0,
            gamma: 1.0,
            convolution: Vec::new(),
            equalization: false,
            minmax: false,
            greyscale: false,
        }
    }
}

impl View {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_image_size(&mut self, w: u32, h: u32) {
        self.width = w;
        self.height = h;
    }

    pub fn set_max_resolutions(&mut self, r: u32) {
        self.max_resolutions = r;
        self.resolution = r as i64 - 1;
    }

    pub fn set_max_size(&mut self, m: i64) {
        self.max_size = m;
    }

    pub fn max_size(&self) -> i64 {
        self.max_size
    }

    pub fn min_size(&self) -> u32 {
        self.min_size
    }

    pub fn set_request_width(&mut self, w: u32) {
        self.requested_width = w;
    }

    pub fn set_request_height(&mut self, h: u32) {
        self.requested_height = h;
    }

    pub fn set_view_left(&mut self, x: f64) -> Result<(), ViewError> {
        self.view_left = clamp01("view_left", x)?;
        Ok(())
    }

    pub fn set_view_top(&mut self, y: f64) -> Result<(), ViewError> {
        self.view_top = clamp01("view_top", y)?;
        Ok(())
    }

    pub fn set_view_width(&mut self, w: f64) -> Result<(), ViewError> {
        self.view_width = clamp01("view_width", w)?;
        Ok(())
    }

    pub fn set_view_height(&mut self, h: f64) -> Result<(), ViewError> {
        self.view_height = clamp01("view_height", h)?;
        Ok(())
    }

    pub fn view_port_set(&self) -> bool {
        self.view_width < 1.0 || self.view_height < 1.0 || self.view_left > 0.0 || self.view_top > 0.0
    }

    /// Disable ICC embedding once any pixel-value-altering transform is
    /// requested.
    pub fn max_icc(&self) -> i32 {
        if self.cmapped || self.shaded || !self.ctw.is_empty() || self.greyscale {
            0
        } else {
            self.max_icc
        }
    }

    /// Whether floating-point intermediate processing is required.
    pub fn float_processing(&self) -> bool {
        self.contrast != 1.0
            || self.gamma != 1.0
            || self.cmapped
            || self.shaded
            || self.inverted
            || self.minmax
            || !self.ctw.is_empty()
            || !self.convolution.is_empty()
    }

    /// Whether a histogram over the source data must be computed.
    pub fn require_histogram(&self) -> bool {
        self.equalization || self.minmax
    }

    pub fn layers(&self) -> i32 {
        if self.max_layers > 0 {
            return if self.layers > 0 && self.layers < self.max_layers {
                self.layers
            } else {
                self.max_layers
            };
        }
        if self.max_layers < 0 && self.layers == 0 {
            return -1;
        }
        self.layers
    }

    /// Target output size, honoring aspect-ratio constraints and
    /// `max_size`.
    pub fn request_size(&self) -> (u32, u32) {
        let mut w = self.requested_width;
        let mut h = self.requested_height;
        let ratio = (self.view_width * self.width as f64) / (self.view_height * self.height as f64);

        if self.requested_width == 0 && self.requested_height != 0 {
            w = (self.requested_height as f64 * ratio).round() as u32;
        } else if self.requested_height == 0 && self.requested_width != 0 {
            h = (self.requested_width as f64 / ratio).round() as u32;
        } else if self.requested_width == 0 && self.requested_height == 0 {
            w = self.width;
            h = self.height;
        } else if self.maintain_aspect {
            let xscale = self.requested_width as f64 / (self.view_width * self.width as f64);
            let yscale = self.requested_height as f64 / (self.view_height * self.height as f64);
            if xscale > yscale {
                w = (self.requested_height as f64 * ratio).round() as u32;
            } else {
                h = (self.requested_width as f64 / ratio).round() as u32;
            }
        }

        if self.max_size > 0 && (w as i64 > self.max_size || h as i64 > self.max_size) {
            let max_size = self.max_size as u32;
            if w > h {
                w = max_size;
                h = (w as f64 / ratio).round() as u32;
            } else if h > w {
                h = max_size;
                w = (h as f64 * ratio).round() as u32;
            } else {
                w = max_size;
                h = max_size;
            }
        }

        (w, h)
    }

    /// Select the smallest resolution level whose dimensions still satisfy
    /// the requested view. `widths`/`heights` are ordered largest-first
    /// (index 0 = full resolution), matching the pyramid level ordering used
    /// elsewhere in this crate; this function internally reverses that to a
    /// smallest-first index while choosing a level, then translates back.
    pub fn resolve_level(&mut self, widths: &[u32], heights: &[u32]) -> usize {
        let max_resolutions = widths.len() as i64;
        let (requested_w, requested_h) = self.request_size();

        // widths/heights here are indexed [0]=largest ... so the smallest-first
        // "level" used below maps to `widths.len() - 1 - i`.
        let mut chosen: i64 = -1;
        for level in (0..max_resolutions).rev() {
            let idx = (max_resolutions - 1 - level) as usize;
            let factor = (1u64 << level) as f64;

            let fw = self.width as f64 * self.view_width;
            let scaled_width = if self.view_width == 1.0 {
                widths[idx]
            } else {
                ((fw / factor) + f32::EPSILON as f64).floor() as u32
            };
            let fh = self.height as f64 * self.view_height;
            let scaled_height = if self.view_height == 1.0 {
                heights[idx]
            } else {
                ((fh / factor) + f32::EPSILON as f64).floor() as u32
            };

            let width_ok = scaled_width <= widths[idx] + 1
                && (requested_w == 0 || scaled_width >= requested_w);
            let height_ok = scaled_height <= heights[idx] + 1
                && (requested_h == 0 || scaled_height >= requested_h);

            if width_ok && height_ok {
                chosen = level;
                break;
            }
        }
        if chosen < 0 {
            chosen = 0;
        }

        let idx = (max_resolutions - 1 - chosen) as usize;
        self.res_width = widths[idx];
        self.res_height = heights[idx];
        self.resolution = self.max_resolutions as i64 - chosen - 1;

        let scale = self.scale();
        if self.max_size > 0
            && ((self.res_width as f64 * self.view_width * scale as f64) as i64 > self.max_size
                || (self.res_height as f64 * self.view_height * scale as f64) as i64 > self.max_size)
        {
            let mut dimension = if (self.res_width as f64 * self.view_width / self.max_size as f64)
                > (self.res_height as f64 * self.view_height / self.max_size as f64)
            {
                (self.res_width as f64 * self.view_width * scale as f64) as i64
            } else {
                (self.res_height as f64 * self.view_height * scale as f64) as i64
            };

            while self.resolution > 0 && dimension > self.max_size {
                dimension /= 2;
                self.resolution -= 1;
                let step_idx = (self.max_resolutions as i64 - 1 - self.resolution) as usize;
                self.res_width = widths[step_idx];
                self.res_height = heights[step_idx];
            }
        }

        self.resolution.max(0) as usize
    }

    /// Scaling factor applied when the requested size falls between two
    /// available resolution levels.
    pub fn scale(&self) -> f32 {
        let rw = if self.requested_width == 0 && self.requested_height > 0 {
            (self.res_width as f64 * self.requested_height as f64 / self.res_height as f64).round() as u32
        } else {
            self.requested_width
        };
        let rh = if self.requested_height == 0 && self.requested_width > 0 {
            (self.res_height as f64 * self.requested_width as f64 / self.res_width as f64).round() as u32
        } else {
            self.requested_height
        };

        let mut scale = rw as f32 / self.width as f32;
        let scale_h = rh as f32 / self.res_height as f32;
        if scale_h < scale {
            scale = scale_h;
        }
        if !(0.0..=1.0).contains(&scale) || scale <= 0.0 {
            scale = 1.0;
        }
        scale
    }

    fn level_factor(&self) -> f64 {
        (1u64 << (self.max_resolutions as i64 - self.resolution - 1).max(0) as u32) as f64
    }

    pub fn pixel_left(&self) -> u32 {
        let l = (self.width as f64 * self.view_left / self.level_factor()).round() as u32;
        l.min(self.res_width)
    }

    pub fn pixel_top(&self) -> u32 {
        let t = (self.height as f64 * self.view_top / self.level_factor()).round() as u32;
        t.min(self.res_height)
    }

    pub fn pixel_width(&self) -> u32 {
        let scale = self.width as f64 / self.level_factor();
        let w = (self.view_width * scale).round() as u32;
        let left = (self.view_left * scale).round() as u32;
        let left = left.min(self.res_width);
        let mut w = if left + w > self.res_width { self.res_width - left } else { w };
        if w < self.min_size {
            w = self.min_size;
        }
        w
    }

    pub fn pixel_height(&self) -> u32 {
        let scale = self.height as f64 / self.level_factor();
        let h = (self.view_height * scale).round() as u32;
        let top = (self.view_top * scale).round() as u32;
        let top = top.min(self.res_height);
        let mut h = if top + h > self.res_height { self.res_height - top } else { h };
        if h < self.min_size {
            h = self.min_size;
        }
        h
    }
}

fn clamp01(field: &'static str, value: f64) -> Result<f64, ViewError> {
    if value.is_nan() {
        return Err(ViewError::ViewportOutOfRange { field, value });
    }
    Ok(value.clamp(0.0, 1.0))
}

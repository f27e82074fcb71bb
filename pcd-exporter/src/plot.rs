//! Raster views of a classified cloud and of its evaluation report.
//!
//! Text is drawn with a TrueType font registered at runtime. Without one, the
//! scatter view is rendered without caption and axis labels and the report
//! view fails with a render error.

use std::{
    fs,
    ops::Range,
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        OnceLock,
    },
};

use plotters::{
    prelude::*,
    style::{register_font, FontStyle},
};

use pcd_core::{
    classes::{ClassLabel, ClassScheme},
    Error, Result,
};

const FONT_FAMILY: &str = "pcls-text";

const DEFAULT_FONT_PATHS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSansMono.ttf",
    "/usr/share/fonts/dejavu/DejaVuSansMono.ttf",
    "/usr/share/fonts/TTF/DejaVuSansMono.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationMono-Regular.ttf",
    "/usr/share/fonts/liberation-mono/LiberationMono-Regular.ttf",
    "C:\\Windows\\Fonts\\consola.ttf",
];

static FONT_REGISTERED: AtomicBool = AtomicBool::new(false);
static DEFAULT_FONT: OnceLock<bool> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScatterStyle {
    pub width: u32,
    pub height: u32,
    pub point_size: u32,
    /// Caption and axis labels; needs a font.
    pub labels: bool,
}

impl Default for ScatterStyle {
    fn default() -> Self {
        Self {
            width: 1800,
            height: 1800,
            point_size: 1,
            labels: true,
        }
    }
}

fn render_error(err: impl std::fmt::Display) -> Error {
    Error::Render(err.to_string())
}

/// Registers the TrueType font used for all text in rendered images.
pub fn register_text_font(path: &Path) -> Result<()> {
    let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
    // the font registry keeps a 'static reference
    let bytes: &'static [u8] = Box::leak(bytes.into_boxed_slice());
    register_font(FONT_FAMILY, FontStyle::Normal, bytes)
        .map_err(|_| Error::Render(format!("{} is not a usable font", path.display())))?;
    FONT_REGISTERED.store(true, Ordering::Release);
    log::debug!("registered text font {}", path.display());
    Ok(())
}

fn text_font_available() -> bool {
    if FONT_REGISTERED.load(Ordering::Acquire) {
        return true;
    }
    *DEFAULT_FONT.get_or_init(|| {
        DEFAULT_FONT_PATHS
            .iter()
            .map(Path::new)
            .filter(|p| p.is_file())
            .any(|p| register_text_font(p).is_ok())
    })
}

fn prepare_output(path: &Path) -> Result<()> {
    match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => fs::create_dir_all(parent).map_err(|e| Error::io(parent, e)),
        None => Ok(()),
    }
}

fn padded_range(values: &[f64]) -> Range<f64> {
    let (min, max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let pad = if max > min { (max - min) * 0.02 } else { 0.5 };
    (min - pad)..(max + pad)
}

/// Plots each point at `(x[i], y[i])` in its class colour. The format follows
/// the extension of `path`.
///
/// Every label is looked up before anything is drawn, so an unmapped class
/// leaves no file behind.
pub fn render_scatter(
    x: &[f64],
    y: &[f64],
    labels: &[ClassLabel],
    scheme: &ClassScheme,
    style: &ScatterStyle,
    path: &Path,
) -> Result<()> {
    if x.len() != y.len() || x.len() != labels.len() {
        return Err(Error::Shape(format!(
            "{} x, {} y and {} labels to plot",
            x.len(),
            y.len(),
            labels.len()
        )));
    }
    if x.is_empty() {
        return Err(Error::Shape("no points to plot".into()));
    }
    let colors = scheme.colors_for(labels)?;

    let with_labels = style.labels && text_font_available();
    if style.labels && !with_labels {
        log::warn!("no text font available, rendering {} without labels", path.display());
    }

    prepare_output(path)?;
    let root = BitMapBackend::new(path, (style.width, style.height)).into_drawing_area();
    root.fill(&WHITE).map_err(render_error)?;

    let mut builder = ChartBuilder::on(&root);
    builder.margin(10);
    if with_labels {
        builder
            .caption("3D Point Cloud Predictions", (FONT_FAMILY, 24.0).into_font())
            .x_label_area_size(40)
            .y_label_area_size(60);
    }
    let mut chart = builder
        .build_cartesian_2d(padded_range(x), padded_range(y))
        .map_err(render_error)?;

    if with_labels {
        chart
            .configure_mesh()
            .disable_mesh()
            .x_desc("X")
            .y_desc("Y")
            .label_style((FONT_FAMILY, 14.0).into_font())
            .axis_desc_style((FONT_FAMILY, 16.0).into_font())
            .draw()
            .map_err(render_error)?;
    }

    chart
        .draw_series(x.iter().zip(y).zip(&colors).map(|((&px, &py), c)| {
            Circle::new((px, py), style.point_size, RGBColor(c.r, c.g, c.b).filled())
        }))
        .map_err(render_error)?;

    root.present().map_err(render_error)?;
    log::info!("wrote {} points to {}", x.len(), path.display());
    Ok(())
}

/// Renders a fixed-width text block, one image line per text line.
pub fn render_report(text: &str, path: &Path) -> Result<()> {
    if !text_font_available() {
        return Err(Error::Render("no text font available for the report".into()));
    }

    const FONT_SIZE: u32 = 16;
    const LINE_HEIGHT: u32 = 20;
    const MARGIN: u32 = 20;

    let lines: Vec<&str> = text.lines().collect();
    let longest = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0) as u32;
    let width = longest * FONT_SIZE * 2 / 3 + 2 * MARGIN;
    let height = lines.len() as u32 * LINE_HEIGHT + 2 * MARGIN;

    prepare_output(path)?;
    let root = BitMapBackend::new(path, (width.max(100), height.max(60))).into_drawing_area();
    root.fill(&WHITE).map_err(render_error)?;

    let font = (FONT_FAMILY, f64::from(FONT_SIZE)).into_font().color(&BLACK);
    for (i, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let top = (MARGIN + i as u32 * LINE_HEIGHT) as i32;
        root.draw(&Text::new(*line, (MARGIN as i32, top), font.clone()))
            .map_err(render_error)?;
    }

    root.present().map_err(render_error)?;
    log::info!("wrote report image {}", path.display());
    Ok(())
}

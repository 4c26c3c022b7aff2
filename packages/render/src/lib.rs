#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Static PNG map rendering.
//!
//! Layers are composed in a fixed stacking order: every polygon of every
//! layer first, then lines, then points, each class in layer order. The
//! view fits the padded union of all layer extents into the canvas
//! without distorting the aspect ratio.

pub mod style;

use std::path::Path;

use geo::{BoundingRect as _, Coord, Geometry, LineString, Polygon, Rect};
use hydro_map_feature_models::{CrsMismatch, FeatureCollection, GeometryKind};
use tiny_skia::{FillRule, Paint, Path as SkPath, PathBuilder, Pixmap, Stroke, Transform};

pub use style::{InvalidColor, LayerStyle, MapStyle, MarkerShape, Rgba};

/// Draw order of geometry classes, bottom to top.
const STACKING_ORDER: [GeometryKind; 3] =
    [GeometryKind::Polygon, GeometryKind::Line, GeometryKind::Point];

/// Errors that prevent a map from being produced.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Nothing to render: no layer has a non-empty geometry")]
    EmptyExtent,

    #[error(transparent)]
    CrsMismatch(#[from] CrsMismatch),

    #[error("Invalid canvas {width_in}x{height_in} in at {dpi} dpi")]
    InvalidCanvas {
        width_in: f32,
        height_in: f32,
        dpi: u32,
    },

    #[error("PNG encoding failed: {0}")]
    Encode(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A borrowed collection plus its symbology.
#[derive(Debug, Clone)]
pub struct Layer<'a> {
    pub name: String,
    pub collection: &'a FeatureCollection,
    pub style: LayerStyle,
}

impl<'a> Layer<'a> {
    #[must_use]
    pub fn new(name: impl Into<String>, collection: &'a FeatureCollection, style: LayerStyle) -> Self {
        Self {
            name: name.into(),
            collection,
            style,
        }
    }
}

/// An encoded map image.
#[derive(Debug, Clone)]
pub struct RenderedMap {
    pub width: u32,
    pub height: u32,
    /// Data extent shown on the canvas, padding included.
    pub extent: Rect<f64>,
    pub png: Vec<u8>,
}

/// Renders `layers` to PNG bytes.
///
/// # Errors
///
/// * [`RenderError::CrsMismatch`] if the layers are not all in one CRS
/// * [`RenderError::EmptyExtent`] if no layer has a drawable geometry
/// * [`RenderError::InvalidCanvas`] if the style yields an empty canvas
/// * [`RenderError::Encode`] if PNG encoding fails
pub fn render(layers: &[Layer<'_>], style: &MapStyle) -> Result<RenderedMap, RenderError> {
    if let Some((first, rest)) = layers.split_first() {
        for layer in rest {
            first.collection.ensure_same_crs(layer.collection)?;
        }
    }

    let (width, height) = style.canvas_size().ok_or(RenderError::InvalidCanvas {
        width_in: style.width_in,
        height_in: style.height_in,
        dpi: style.dpi,
    })?;

    let extent = padded_extent(layers, style.padding).ok_or(RenderError::EmptyExtent)?;
    let view = Viewport::fit(extent, width, height);

    let mut pixmap = Pixmap::new(width, height).ok_or(RenderError::InvalidCanvas {
        width_in: style.width_in,
        height_in: style.height_in,
        dpi: style.dpi,
    })?;
    pixmap.fill(style.background.to_color());

    let painters = layers
        .iter()
        .map(|layer| Painter::new(&layer.style, style.px_per_point()))
        .collect::<Vec<_>>();

    for class in STACKING_ORDER {
        for (layer, painter) in layers.iter().zip(&painters) {
            log::trace!("Drawing {} geometries of layer '{}'", class.as_str(), layer.name);
            for feature in layer.collection.iter() {
                draw(&mut pixmap, &feature.geometry, class, painter, &view);
            }
        }
    }

    let png = pixmap
        .encode_png()
        .map_err(|e| RenderError::Encode(e.to_string()))?;

    log::info!(
        "Rendered {} layer(s) to a {width}x{height} map ({} bytes)",
        layers.len(),
        png.len()
    );

    Ok(RenderedMap {
        width,
        height,
        extent,
        png,
    })
}

/// Renders `layers` and writes the PNG to `path`.
///
/// The image is written next to the target and renamed over it, so an
/// existing map is never left half-written.
///
/// # Errors
///
/// Returns any [`render`] error, or [`RenderError::Io`] if the file
/// cannot be written.
pub fn render_to_file(
    layers: &[Layer<'_>],
    style: &MapStyle,
    path: &Path,
) -> Result<RenderedMap, RenderError> {
    let map = render(layers, style)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let tmp = path.with_extension("png.tmp");
    std::fs::write(&tmp, &map.png)?;
    std::fs::rename(&tmp, path)?;

    log::info!("Map written to {}", path.display());
    Ok(map)
}

/// Union of all layer bounds grown by `padding` times its larger side.
fn padded_extent(layers: &[Layer<'_>], padding: f64) -> Option<Rect<f64>> {
    let extent = layers
        .iter()
        .flat_map(|layer| layer.collection.iter())
        .filter_map(|feature| feature.geometry.bounding_rect())
        .reduce(|a, b| {
            Rect::new(
                Coord {
                    x: a.min().x.min(b.min().x),
                    y: a.min().y.min(b.min().y),
                },
                Coord {
                    x: a.max().x.max(b.max().x),
                    y: a.max().y.max(b.max().y),
                },
            )
        })?;

    let side = extent.width().max(extent.height());
    // a lone point has no size to scale the padding by
    let pad = if side > 0.0 { side * padding.max(0.0) } else { 1.0 };

    Some(Rect::new(
        Coord {
            x: extent.min().x - pad,
            y: extent.min().y - pad,
        },
        Coord {
            x: extent.max().x + pad,
            y: extent.max().y + pad,
        },
    ))
}

/// Maps world coordinates to pixels, y pointing down.
struct Viewport {
    min_x: f64,
    max_y: f64,
    scale: f64,
    offset_x: f64,
    offset_y: f64,
}

impl Viewport {
    fn fit(extent: Rect<f64>, width: u32, height: u32) -> Self {
        let (width, height) = (f64::from(width), f64::from(height));
        let scale_x = if extent.width() > 0.0 { width / extent.width() } else { f64::INFINITY };
        let scale_y = if extent.height() > 0.0 { height / extent.height() } else { f64::INFINITY };
        let scale = scale_x.min(scale_y);

        Self {
            min_x: extent.min().x,
            max_y: extent.max().y,
            scale,
            offset_x: extent.width().mul_add(-scale, width) / 2.0,
            offset_y: extent.height().mul_add(-scale, height) / 2.0,
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn project(&self, coord: Coord<f64>) -> Option<(f32, f32)> {
        let x = (coord.x - self.min_x).mul_add(self.scale, self.offset_x) as f32;
        let y = (self.max_y - coord.y).mul_add(self.scale, self.offset_y) as f32;
        (x.is_finite() && y.is_finite()).then_some((x, y))
    }
}

/// Resolved paints for one layer.
struct Painter {
    fill: Option<Paint<'static>>,
    stroke: Option<Paint<'static>>,
    stroke_style: Stroke,
    marker: MarkerShape,
    marker_radius: f32,
}

impl Painter {
    fn new(style: &LayerStyle, px_per_point: f32) -> Self {
        let paint = |color: Rgba| {
            let mut paint = Paint::default();
            paint.set_color_rgba8(color.r, color.g, color.b, color.a);
            paint.anti_alias = true;
            paint
        };

        Self {
            fill: style.fill.map(paint),
            stroke: style.stroke.map(paint),
            stroke_style: Stroke {
                width: (style.stroke_width * px_per_point).max(0.0),
                ..Stroke::default()
            },
            marker: style.marker,
            marker_radius: (style.marker_size * px_per_point / 2.0).max(0.5),
        }
    }

    fn fill_path(&self, pixmap: &mut Pixmap, path: &SkPath) {
        if let Some(paint) = &self.fill {
            pixmap.fill_path(path, paint, FillRule::EvenOdd, Transform::identity(), None);
        }
    }

    fn stroke_path(&self, pixmap: &mut Pixmap, path: &SkPath) {
        if let Some(paint) = &self.stroke
            && self.stroke_style.width > 0.0
        {
            pixmap.stroke_path(path, paint, &self.stroke_style, Transform::identity(), None);
        }
    }

    fn polygons(&self, pixmap: &mut Pixmap, polygons: &[Polygon<f64>], view: &Viewport) {
        let mut builder = PathBuilder::new();
        for polygon in polygons {
            append_ring(&mut builder, polygon.exterior(), view, true);
            for interior in polygon.interiors() {
                append_ring(&mut builder, interior, view, true);
            }
        }
        if let Some(path) = builder.finish() {
            self.fill_path(pixmap, &path);
            self.stroke_path(pixmap, &path);
        }
    }

    fn line(&self, pixmap: &mut Pixmap, line: &LineString<f64>, view: &Viewport) {
        let mut builder = PathBuilder::new();
        append_ring(&mut builder, line, view, false);
        if let Some(path) = builder.finish() {
            self.stroke_path(pixmap, &path);
        }
    }

    fn marker(&self, pixmap: &mut Pixmap, at: Coord<f64>, view: &Viewport) {
        let Some((x, y)) = view.project(at) else {
            return;
        };
        let r = self.marker_radius;

        let path = match self.marker {
            MarkerShape::Circle => PathBuilder::from_circle(x, y, r),
            MarkerShape::Square => {
                tiny_skia::Rect::from_xywh(x - r, y - r, 2.0 * r, 2.0 * r).map(PathBuilder::from_rect)
            }
            MarkerShape::Triangle => {
                let mut builder = PathBuilder::new();
                builder.move_to(x, y - r);
                builder.line_to(r.mul_add(0.866, x), r.mul_add(0.5, y));
                builder.line_to(r.mul_add(-0.866, x), r.mul_add(0.5, y));
                builder.close();
                builder.finish()
            }
        };

        if let Some(path) = path {
            self.fill_path(pixmap, &path);
            self.stroke_path(pixmap, &path);
        }
    }
}

fn append_ring(builder: &mut PathBuilder, ring: &LineString<f64>, view: &Viewport, close: bool) {
    let mut points = ring.coords().filter_map(|c| view.project(*c));
    let Some((x, y)) = points.next() else {
        return;
    };
    builder.move_to(x, y);
    for (x, y) in points {
        builder.line_to(x, y);
    }
    if close {
        builder.close();
    }
}

/// Draws the parts of `geometry` that belong to `class`.
fn draw(
    pixmap: &mut Pixmap,
    geometry: &Geometry<f64>,
    class: GeometryKind,
    painter: &Painter,
    view: &Viewport,
) {
    match (geometry, class) {
        (Geometry::Polygon(p), GeometryKind::Polygon) => {
            painter.polygons(pixmap, std::slice::from_ref(p), view);
        }
        (Geometry::MultiPolygon(mp), GeometryKind::Polygon) => {
            painter.polygons(pixmap, &mp.0, view);
        }
        (Geometry::Rect(r), GeometryKind::Polygon) => {
            painter.polygons(pixmap, &[r.to_polygon()], view);
        }
        (Geometry::Triangle(t), GeometryKind::Polygon) => {
            painter.polygons(pixmap, &[t.to_polygon()], view);
        }
        (Geometry::Line(l), GeometryKind::Line) => {
            painter.line(pixmap, &LineString::new(vec![l.start, l.end]), view);
        }
        (Geometry::LineString(ls), GeometryKind::Line) => painter.line(pixmap, ls, view),
        (Geometry::MultiLineString(mls), GeometryKind::Line) => {
            for ls in mls {
                painter.line(pixmap, ls, view);
            }
        }
        (Geometry::Point(p), GeometryKind::Point) => painter.marker(pixmap, p.0, view),
        (Geometry::MultiPoint(mp), GeometryKind::Point) => {
            for p in mp {
                painter.marker(pixmap, p.0, view);
            }
        }
        (Geometry::GeometryCollection(gc), _) => {
            for member in gc {
                draw(pixmap, member, class, painter, view);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{line_string, point, polygon};
    use hydro_map_feature_models::{Crs, Feature};

    fn square() -> FeatureCollection {
        FeatureCollection::with_features(
            Crs::Epsg(5070),
            vec![Feature::new(
                "county",
                polygon![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 10.0), (x: 0.0, y: 10.0)],
            )],
        )
    }

    fn solid(fill: Option<Rgba>, stroke: Option<Rgba>, stroke_width: f32) -> LayerStyle {
        LayerStyle {
            fill,
            stroke,
            stroke_width,
            marker: MarkerShape::Circle,
            marker_size: 20.0,
        }
    }

    fn rgb(pixmap: &Pixmap, x: u32, y: u32) -> (u8, u8, u8) {
        let px = pixmap.pixel(x, y).unwrap();
        (px.red(), px.green(), px.blue())
    }

    #[test]
    fn points_and_lines_stack_above_polygons() {
        let polygons = square();
        let lines = FeatureCollection::with_features(
            Crs::Epsg(5070),
            vec![Feature::new("river", line_string![(x: 0.0, y: 5.0), (x: 10.0, y: 5.0)])],
        );
        let points = FeatureCollection::with_features(
            Crs::Epsg(5070),
            vec![Feature::new("gage", point!(x: 5.0, y: 5.0))],
        );

        // listed top-down on purpose: class order must still win
        let layers = [
            Layer::new("gages", &points, solid(Some(Rgba::opaque(255, 0, 0)), None, 0.0)),
            Layer::new("rivers", &lines, solid(None, Some(Rgba::opaque(0, 255, 0)), 4.0)),
            Layer::new("counties", &polygons, solid(Some(Rgba::opaque(0, 0, 255)), None, 0.0)),
        ];
        let style = MapStyle {
            width_in: 2.0,
            height_in: 2.0,
            dpi: 72,
            padding: 0.0,
            background: Rgba::WHITE,
        };

        let map = render(&layers, &style).unwrap();
        let pixmap = Pixmap::decode_png(&map.png).unwrap();

        assert_eq!(rgb(&pixmap, 72, 72), (255, 0, 0));
        assert_eq!(rgb(&pixmap, 20, 72), (0, 255, 0));
        assert_eq!(rgb(&pixmap, 5, 5), (0, 0, 255));
    }

    #[test]
    fn canvas_matches_physical_size_and_dpi() {
        let polygons = square();
        let layers = [Layer::new("counties", &polygons, LayerStyle::default())];
        let style = MapStyle {
            width_in: 3.0,
            height_in: 2.0,
            dpi: 50,
            ..MapStyle::default()
        };

        let map = render(&layers, &style).unwrap();
        assert_eq!((map.width, map.height), (150, 100));

        let pixmap = Pixmap::decode_png(&map.png).unwrap();
        assert_eq!((pixmap.width(), pixmap.height()), (150, 100));
        assert!(map.extent.min().x < 0.0 && map.extent.max().x > 10.0);
    }

    #[test]
    fn rejects_mixed_crs() {
        let projected = square();
        let mut geographic = square();
        geographic.crs = Crs::WGS84;

        let layers = [
            Layer::new("a", &projected, LayerStyle::default()),
            Layer::new("b", &geographic, LayerStyle::default()),
        ];
        assert!(matches!(
            render(&layers, &MapStyle::default()),
            Err(RenderError::CrsMismatch(_))
        ));
    }

    #[test]
    fn empty_layers_have_no_extent() {
        let empty = FeatureCollection::new(Crs::WGS84);
        let layers = [Layer::new("empty", &empty, LayerStyle::default())];
        assert!(matches!(
            render(&layers, &MapStyle::default()),
            Err(RenderError::EmptyExtent)
        ));
        assert!(matches!(render(&[], &MapStyle::default()), Err(RenderError::EmptyExtent)));
    }

    #[test]
    fn single_point_gets_a_frame() {
        let points = FeatureCollection::with_features(
            Crs::Epsg(5070),
            vec![Feature::new("only", point!(x: 100.0, y: 200.0))],
        );
        let layers = [Layer::new("gage", &points, LayerStyle::default())];
        let map = render(&layers, &MapStyle::default()).unwrap();
        assert!((map.extent.width() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn writes_png_file() {
        let dir = std::env::temp_dir().join("hydro_map_render_file");
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("map.png");

        let polygons = square();
        let layers = [Layer::new("counties", &polygons, LayerStyle::default())];
        let map = render_to_file(&layers, &MapStyle::default(), &path).unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), map.png);
        assert!(!path.with_extension("png.tmp").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}

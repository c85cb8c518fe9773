//! Connection routing: horizontal S-curves between node anchors.
//!
//! Wires leave a node's output anchor (right edge) and enter a generator's
//! input anchor (left edge). Both control points are pushed horizontally by
//! half the horizontal distance between the anchors.

use ib_core::Node;
use kurbo::{CubicBez, ParamCurveNearest, Point, Vec2};

/// Vertical offset of both anchors from a node's top edge. Anchors sit in
/// the node header, so they stay put while the body grows.
pub const ANCHOR_OFFSET_Y: f64 = 40.0;

/// Stroke width used for drawing a connection.
pub const VISUAL_STROKE_WIDTH: f64 = 2.0;

/// Width of the invisible stroke used for click selection.
pub const HIT_STROKE_WIDTH: f64 = 20.0;

/// Curve-nearest accuracy, in world units.
const NEAREST_ACCURACY: f64 = 0.05;

pub fn output_anchor(node: &Node) -> Point {
    Point::new(
        node.position.x + node.size.width,
        node.position.y + ANCHOR_OFFSET_Y,
    )
}

pub fn input_anchor(node: &Node) -> Point {
    Point::new(node.position.x, node.position.y + ANCHOR_OFFSET_Y)
}

/// Geometry of one wire, either a committed connection or the
/// rubber-band line while dragging a new one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConnectionRoute {
    pub start: Point,
    pub end: Point,
}

impl ConnectionRoute {
    pub fn new(start: Point, end: Point) -> Self {
        Self { start, end }
    }

    /// Route from `source`'s output anchor to `target`'s input anchor.
    pub fn between(source: &Node, target: &Node) -> Self {
        Self::new(output_anchor(source), input_anchor(target))
    }

    pub fn control_points(&self) -> (Point, Point) {
        let half = (self.end.x - self.start.x).abs() / 2.0;
        (
            self.start + Vec2::new(half, 0.0),
            self.end - Vec2::new(half, 0.0),
        )
    }

    pub fn curve(&self) -> CubicBez {
        let (c1, c2) = self.control_points();
        CubicBez::new(self.start, c1, c2, self.end)
    }

    /// Point on the curve at `t`, from the cubic Bernstein weights.
    pub fn point_at(&self, t: f64) -> Point {
        let (c1, c2) = self.control_points();
        let mt = 1.0 - t;
        let w0 = mt * mt * mt;
        let w1 = 3.0 * mt * mt * t;
        let w2 = 3.0 * mt * t * t;
        let w3 = t * t * t;
        Point::new(
            w0 * self.start.x + w1 * c1.x + w2 * c2.x + w3 * self.end.x,
            w0 * self.start.y + w1 * c1.y + w2 * c2.y + w3 * self.end.y,
        )
    }

    /// Where the delete control goes when the connection is selected.
    pub fn midpoint(&self) -> Point {
        self.point_at(0.5)
    }

    /// True if `p` lies within the `stroke_width`-wide band along the curve.
    pub fn hit(&self, p: Point, stroke_width: f64) -> bool {
        let half = stroke_width / 2.0;
        self.curve().nearest(p, NEAREST_ACCURACY).distance_sq <= half * half
    }

    /// SVG `d` attribute for hosts that draw wires as SVG paths.
    pub fn to_svg_path(&self) -> String {
        let (c1, c2) = self.control_points();
        format!(
            "M {} {} C {} {}, {} {}, {} {}",
            self.start.x, self.start.y, c1.x, c1.y, c2.x, c2.y, self.end.x, self.end.y
        )
    }
}

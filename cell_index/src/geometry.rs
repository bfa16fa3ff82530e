//! Planar helpers used to turn free-form polygon selections into index queries.

use rand::seq::SliceRandom;
use serde::{Serialize, Deserialize};

/// Relative slack applied to circle radii when testing containment.
pub const MULTIPLICATIVE_EPSILON: f64 = 1.0 + 1e-12;

/// Absolute slack, so a zero-radius circle still contains (numerically) its own point.
pub const ABSOLUTE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {

    pub fn new(x: f64, y: f64) -> Self {
        return Self { x, y };
    }

    pub fn distance(&self, other: &Point) -> f64 {
        return (self.x - other.x).hypot(self.y - other.y);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    pub x: f64,
    pub y: f64,
    pub r: f64,
}

impl Circle {

    pub fn center(&self) -> Point {
        return Point::new(self.x, self.y);
    }

    /// Containment with epsilon slack on the radius.
    pub fn contains(&self, p: &Point) -> bool {
        return self.center().distance(p) <= self.r * MULTIPLICATIVE_EPSILON + ABSOLUTE_EPSILON;
    }

    /// Radius to use when this circle serves as a coarse filter.
    pub fn query_radius(&self) -> f64 {
        return self.r * MULTIPLICATIVE_EPSILON + ABSOLUTE_EPSILON;
    }
}

/// Smallest circle enclosing all `points`, or `None` for an empty slice.
///
/// Randomized incremental construction: points are shuffled, and whenever a point falls outside
/// the running circle the circle is rebuilt with that point on its boundary (then with two, then
/// three boundary points). Expected O(n).
pub fn minimal_enclosing_circle(points: &[Point]) -> Option<Circle> {

    let mut shuffled: Vec<Point> = points.to_vec();
    shuffled.shuffle(&mut rand::thread_rng());

    let mut circle: Option<Circle> = None;

    for (i, p) in shuffled.iter().enumerate() {

        match circle {
            Some(c) if c.contains(p) => {},
            _ => circle = Some(circle_with_one_point(&shuffled[..i + 1], *p)),
        }
    }

    return circle;
}

//one boundary point known
fn circle_with_one_point(points: &[Point], p: Point) -> Circle {

    let mut c = Circle { x: p.x, y: p.y, r: 0.0 };

    for (i, q) in points.iter().enumerate() {

        if c.contains(q) {
            continue;
        }

        c = match c.r == 0.0 {
            true => diameter_circle(&p, q),
            false => circle_with_two_points(&points[..i + 1], p, *q),
        };
    }

    return c;
}

//two boundary points known
fn circle_with_two_points(points: &[Point], p: Point, q: Point) -> Circle {

    let circ = diameter_circle(&p, &q);

    let mut left: Option<Circle> = None;
    let mut right: Option<Circle> = None;

    for r in points.iter() {

        if circ.contains(r) {
            continue;
        }

        let cross = cross_product(&p, &q, r);

        let c = match circumcircle(&p, &q, r) {
            None => continue,
            Some(c) => c,
        };

        let c_cross = cross_product(&p, &q, &c.center());

        if cross > 0.0 {
            let better = match left {
                None => true,
                Some(l) => c_cross > cross_product(&p, &q, &l.center()),
            };
            if better {
                left = Some(c);
            }
        } else if cross < 0.0 {
            let better = match right {
                None => true,
                Some(rc) => c_cross < cross_product(&p, &q, &rc.center()),
            };
            if better {
                right = Some(c);
            }
        }
    }

    return match (left, right) {
        (None, None) => circ,
        (Some(l), None) => l,
        (None, Some(r)) => r,
        (Some(l), Some(r)) => match l.r <= r.r {
            true => l,
            false => r,
        },
    };
}

fn diameter_circle(a: &Point, b: &Point) -> Circle {

    let cx = (a.x + b.x) / 2.0;
    let cy = (a.y + b.y) / 2.0;
    let center = Point::new(cx, cy);

    let r = center.distance(a).max(center.distance(b));

    return Circle { x: cx, y: cy, r };
}

/// Circle through three points; `None` when they are collinear.
fn circumcircle(a: &Point, b: &Point, c: &Point) -> Option<Circle> {

    //translate to the bounding box center for precision
    let ox = (a.x.min(b.x).min(c.x) + a.x.max(b.x).max(c.x)) / 2.0;
    let oy = (a.y.min(b.y).min(c.y) + a.y.max(b.y).max(c.y)) / 2.0;

    let (ax, ay) = (a.x - ox, a.y - oy);
    let (bx, by) = (b.x - ox, b.y - oy);
    let (cx, cy) = (c.x - ox, c.y - oy);

    let d = (ax * (by - cy) + bx * (cy - ay) + cx * (ay - by)) * 2.0;
    if d == 0.0 {
        return None;
    }

    let a_sq = ax * ax + ay * ay;
    let b_sq = bx * bx + by * by;
    let c_sq = cx * cx + cy * cy;

    let x = ox + (a_sq * (by - cy) + b_sq * (cy - ay) + c_sq * (ay - by)) / d;
    let y = oy + (a_sq * (cx - bx) + b_sq * (ax - cx) + c_sq * (bx - ax)) / d;

    let center = Point::new(x, y);
    let r = center.distance(a).max(center.distance(b)).max(center.distance(c));

    return Some(Circle { x, y, r });
}

/// Twice the signed area of triangle (a, b, c).
fn cross_product(a: &Point, b: &Point, c: &Point) -> f64 {
    return (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x);
}

/// Even-odd containment of `p` in the polygon given by ordered `vertices` (implicitly closed).
///
/// Boundary convention is half-open, the usual crossing-number one: an edge counts when it spans
/// `p.y` with its lower endpoint included and its upper endpoint excluded, and a crossing is
/// recorded only when the edge lies strictly to the right of `p`. So points on left and bottom
/// edges are inside, points on right and top edges are outside, consistently for tiled polygons.
/// Polygons with fewer than three vertices contain nothing.
pub fn point_in_polygon(p: &Point, vertices: &[Point]) -> bool {

    let n = vertices.len();
    if n < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = n - 1;

    for i in 0..n {

        let vi = &vertices[i];
        let vj = &vertices[j];

        if (vi.y > p.y) != (vj.y > p.y) {
            let x_cross = (vj.x - vi.x) * (p.y - vi.y) / (vj.y - vi.y) + vi.x;
            if p.x < x_cross {
                inside = !inside;
            }
        }

        j = i;
    }

    return inside;
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::Rng;

    fn brute_force_circle(points: &[Point]) -> Circle {

        let mut best: Option<Circle> = None;

        let mut consider = |c: Circle| {
            if points.iter().all(|p| c.contains(p)) {
                match best {
                    Some(b) if b.r <= c.r => {},
                    _ => best = Some(c),
                }
            }
        };

        for i in 0..points.len() {
            consider(Circle { x: points[i].x, y: points[i].y, r: 0.0 });
            for j in (i + 1)..points.len() {
                consider(diameter_circle(&points[i], &points[j]));
                for k in (j + 1)..points.len() {
                    if let Some(c) = circumcircle(&points[i], &points[j], &points[k]) {
                        consider(c);
                    }
                }
            }
        }

        return best.unwrap();
    }

    #[test]
    fn single_point_circle() {

        let c = minimal_enclosing_circle(&[Point::new(3.0, -2.0)]).unwrap();
        assert_approx_eq!(c.x, 3.0);
        assert_approx_eq!(c.y, -2.0);
        assert_approx_eq!(c.r, 0.0);
    }

    #[test]
    fn empty_input_has_no_circle() {
        assert!(minimal_enclosing_circle(&[]).is_none());
    }

    #[test]
    fn two_point_circle_is_diameter() {

        let c = minimal_enclosing_circle(&[Point::new(0.0, 0.0), Point::new(4.0, 0.0)]).unwrap();
        assert_approx_eq!(c.x, 2.0);
        assert_approx_eq!(c.y, 0.0);
        assert_approx_eq!(c.r, 2.0);
    }

    #[test]
    fn collinear_and_duplicate_points() {

        let points = vec![
            Point::new(0.0, 0.0),
            Point::new(1.0, 1.0),
            Point::new(2.0, 2.0),
            Point::new(2.0, 2.0),
            Point::new(3.0, 3.0),
        ];

        let c = minimal_enclosing_circle(&points).unwrap();
        assert_approx_eq!(c.x, 1.5);
        assert_approx_eq!(c.y, 1.5);
        assert_approx_eq!(c.r, (4.5f64).sqrt());
    }

    #[test]
    fn right_triangle_uses_hypotenuse() {

        let points = vec![Point::new(0.0, 0.0), Point::new(6.0, 0.0), Point::new(0.0, 8.0)];
        let c = minimal_enclosing_circle(&points).unwrap();
        assert_approx_eq!(c.x, 3.0);
        assert_approx_eq!(c.y, 4.0);
        assert_approx_eq!(c.r, 5.0);
    }

    #[test]
    fn random_circles_are_enclosing_and_minimal() {

        let mut rng = rand::thread_rng();

        for _ in 0..200 {

            let n = rng.gen_range(1..12);
            let points: Vec<Point> = (0..n)
                .map(|_| Point::new(rng.gen_range(-100.0..100.0), rng.gen_range(-100.0..100.0)))
                .collect();

            let c = minimal_enclosing_circle(&points).unwrap();
            for p in points.iter() {
                assert!(c.center().distance(p) <= c.r + 1e-6);
            }

            let reference = brute_force_circle(&points);
            assert!(c.r <= reference.r + 1e-6, "{} > {}", c.r, reference.r);
        }
    }

    #[test]
    fn near_collinear_points_stay_enclosed() {

        let points: Vec<Point> = (0..50)
            .map(|i| Point::new(i as f64, (i as f64) * 1e-13))
            .collect();

        let c = minimal_enclosing_circle(&points).unwrap();
        for p in points.iter() {
            assert!(c.contains(p));
        }
        assert_approx_eq!(c.r, 24.5, 1e-6);
    }

    #[test]
    fn polygon_containment() {

        let square = vec![
            Point::new(0.0, 0.0),
            Point::new(2.0, 0.0),
            Point::new(2.0, 2.0),
            Point::new(0.0, 2.0),
        ];

        assert!(point_in_polygon(&Point::new(1.0, 1.0), &square));
        assert!(!point_in_polygon(&Point::new(3.0, 1.0), &square));
        assert!(!point_in_polygon(&Point::new(-0.5, 1.0), &square));

        //half-open boundary: left/bottom in, right/top out
        assert!(point_in_polygon(&Point::new(0.0, 1.0), &square));
        assert!(point_in_polygon(&Point::new(1.0, 0.0), &square));
        assert!(!point_in_polygon(&Point::new(2.0, 1.0), &square));
        assert!(!point_in_polygon(&Point::new(1.0, 2.0), &square));
    }

    #[test]
    fn concave_polygon() {

        //U shape, the notch is outside
        let u = vec![
            Point::new(0.0, 0.0),
            Point::new(3.0, 0.0),
            Point::new(3.0, 3.0),
            Point::new(2.0, 3.0),
            Point::new(2.0, 1.0),
            Point::new(1.0, 1.0),
            Point::new(1.0, 3.0),
            Point::new(0.0, 3.0),
        ];

        assert!(point_in_polygon(&Point::new(0.5, 2.0), &u));
        assert!(point_in_polygon(&Point::new(2.5, 2.0), &u));
        assert!(!point_in_polygon(&Point::new(1.5, 2.0), &u));
        assert!(point_in_polygon(&Point::new(1.5, 0.5), &u));
    }

    #[test]
    fn degenerate_polygons_contain_nothing() {

        let line = vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)];
        assert!(!point_in_polygon(&Point::new(0.5, 0.5), &line));
        assert!(!point_in_polygon(&Point::new(0.0, 0.0), &[Point::new(0.0, 0.0)]));
    }
}

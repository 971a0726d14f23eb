// Well-known-text reading (via the `wkt` crate) and a writer producing the spaced
// form used in store files, e.g. `POINT (1 2)` and `POLYGON ((0 0, 1 0, 1 1, 0 0))`.
use std::fmt::Write;

use geo_types::{Coord, Geometry, LineString, Point, Polygon};
use wkt::TryFromWkt;

pub fn parse_wkt(text: &str) -> Result<Geometry<f64>, String> {
    Geometry::<f64>::try_from_wkt_str(text.trim()).map_err(|err| err.to_string())
}

pub fn to_wkt(geometry: &Geometry<f64>) -> String {
    let mut out = String::new();
    write_geometry(geometry, &mut out);
    out
}

fn write_geometry(geometry: &Geometry<f64>, out: &mut String) {
    match geometry {
        Geometry::Point(point) => {
            out.push_str("POINT ");
            write_point_body(point, out);
        }
        Geometry::Line(line) => {
            out.push_str("LINESTRING ");
            write_coords(&[line.start, line.end], out);
        }
        Geometry::LineString(line) => {
            out.push_str("LINESTRING ");
            write_coords(&line.0, out);
        }
        Geometry::Polygon(polygon) => {
            out.push_str("POLYGON ");
            write_polygon_body(polygon, out);
        }
        Geometry::MultiPoint(points) => {
            out.push_str("MULTIPOINT ");
            write_list(&points.0, out, write_point_body);
        }
        Geometry::MultiLineString(lines) => {
            out.push_str("MULTILINESTRING ");
            write_list(&lines.0, out, |line: &LineString<f64>, out: &mut String| {
                write_coords(&line.0, out)
            });
        }
        Geometry::MultiPolygon(polygons) => {
            out.push_str("MULTIPOLYGON ");
            write_list(&polygons.0, out, write_polygon_body);
        }
        Geometry::GeometryCollection(collection) => {
            out.push_str("GEOMETRYCOLLECTION ");
            write_list(&collection.0, out, write_geometry);
        }
        Geometry::Rect(rect) => {
            out.push_str("POLYGON ");
            write_polygon_body(&rect.to_polygon(), out);
        }
        Geometry::Triangle(triangle) => {
            out.push_str("POLYGON ");
            write_polygon_body(&triangle.to_polygon(), out);
        }
    }
}

fn write_list<T>(items: &[T], out: &mut String, mut write_item: impl FnMut(&T, &mut String)) {
    if items.is_empty() {
        out.push_str("EMPTY");
        return;
    }
    out.push('(');
    for (index, item) in items.iter().enumerate() {
        if index > 0 {
            out.push_str(", ");
        }
        write_item(item, out);
    }
    out.push(')');
}

fn write_point_body(point: &Point<f64>, out: &mut String) {
    out.push('(');
    write_coord(&point.0, out);
    out.push(')');
}

fn write_polygon_body(polygon: &Polygon<f64>, out: &mut String) {
    if polygon.exterior().0.is_empty() {
        out.push_str("EMPTY");
        return;
    }
    out.push('(');
    write_coords(&polygon.exterior().0, out);
    for interior in polygon.interiors() {
        out.push_str(", ");
        write_coords(&interior.0, out);
    }
    out.push(')');
}

fn write_coords(coords: &[Coord<f64>], out: &mut String) {
    write_list(coords, out, write_coord);
}

fn write_coord(coord: &Coord<f64>, out: &mut String) {
    let _ = write!(out, "{} {}", coord.x, coord.y);
}

#[cfg(test)]
mod tests {
    use super::{parse_wkt, to_wkt};
    use geo_types::{Geometry, LineString, Point, Polygon, line_string, point, polygon};

    #[test]
    fn point_uses_spaced_form() {
        let geometry = Geometry::Point(Point::new(1.0, 2.0));
        assert_eq!(to_wkt(&geometry), "POINT (1 2)");
    }

    #[test]
    fn fractional_coordinates_keep_precision() {
        let geometry = Geometry::Point(point!(x: -73.5, y: 40.25));
        assert_eq!(to_wkt(&geometry), "POINT (-73.5 40.25)");
    }

    #[test]
    fn polygon_with_hole_is_written_ring_by_ring() {
        let polygon: Polygon<f64> = polygon!(
            exterior: [(x: 0.0, y: 0.0), (x: 4.0, y: 0.0), (x: 4.0, y: 4.0), (x: 0.0, y: 0.0)],
            interiors: [[(x: 1.0, y: 1.0), (x: 2.0, y: 1.0), (x: 2.0, y: 2.0), (x: 1.0, y: 1.0)]]
        );
        assert_eq!(
            to_wkt(&Geometry::Polygon(polygon)),
            "POLYGON ((0 0, 4 0, 4 4, 0 0), (1 1, 2 1, 2 2, 1 1))"
        );
    }

    #[test]
    fn empty_line_string_is_marked_empty() {
        let line: LineString<f64> = LineString::new(vec![]);
        assert_eq!(to_wkt(&Geometry::LineString(line)), "LINESTRING EMPTY");
    }

    #[test]
    fn parse_accepts_both_spacings() {
        let spaced = parse_wkt("POINT (1 2)").expect("spaced");
        let compact = parse_wkt("POINT(1 2)").expect("compact");
        assert_eq!(spaced, compact);
        assert_eq!(spaced, Geometry::Point(Point::new(1.0, 2.0)));
    }

    #[test]
    fn written_text_parses_back() {
        let line = Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 1.5, y: -2.0)]);
        let text = to_wkt(&line);
        assert_eq!(text, "LINESTRING (0 0, 1.5 -2)");
        assert_eq!(parse_wkt(&text).expect("parse"), line);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_wkt("POINT (1").is_err());
        assert!(parse_wkt("not wkt").is_err());
    }
}

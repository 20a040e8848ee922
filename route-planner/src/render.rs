use std::collections::BTreeMap;

use geo::Coord;
use geojson::{Feature, FeatureCollection, Geometry};
use serde::{Deserialize, Serialize};

/// Rendering happens in (latitude, longitude) order, the opposite of GeoJSON and OSRM.
#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> LatLng {
        LatLng { lat, lng }
    }

    pub fn to_coord(self) -> Coord {
        Coord {
            x: self.lng,
            y: self.lat,
        }
    }
}

impl From<Coord> for LatLng {
    fn from(pt: Coord) -> Self {
        LatLng {
            lat: pt.y,
            lng: pt.x,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct PointID(pub u32);
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct PolylineID(pub u32);
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct SubscriptionID(pub u32);

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PolylineStyle {
    /// Leg styles leave this unset; the palette fills it in
    pub color: Option<String>,
    pub weight: f64,
    pub opacity: f64,
    /// Like "5, 8"
    pub dash_array: Option<String>,
}

impl Default for PolylineStyle {
    fn default() -> Self {
        Self {
            color: None,
            weight: 3.0,
            opacity: 1.0,
            dash_array: None,
        }
    }
}

impl PolylineStyle {
    pub fn with_color(&self, color: &str) -> PolylineStyle {
        let mut style = self.clone();
        style.color = Some(color.to_string());
        style
    }
}

/// What a polyline is for, independent of how it's styled
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolylineKind {
    /// Between two consecutive waypoints
    Leg,
    /// The whole route
    Overview,
}

impl PolylineKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PolylineKind::Leg => "leg",
            PolylineKind::Overview => "overview",
        }
    }
}

/// Called with the new position after the user finishes dragging a point.
pub type MoveCallback = Box<dyn FnMut(LatLng)>;

/// Whatever draws the route on a map. Points are draggable and labeled.
pub trait RenderingSurface {
    fn add_point(&mut self, position: LatLng, label: &str) -> PointID;
    fn remove_point(&mut self, point: PointID);
    fn set_point_label(&mut self, point: PointID, label: &str);

    /// Callbacks must not synchronously call back into the surface.
    fn subscribe_moved(&mut self, point: PointID, callback: MoveCallback) -> SubscriptionID;
    fn unsubscribe(&mut self, subscription: SubscriptionID);

    fn add_polyline(
        &mut self,
        kind: PolylineKind,
        points: Vec<LatLng>,
        style: &PolylineStyle,
    ) -> PolylineID;
    fn remove_polyline(&mut self, polyline: PolylineID);
}

#[derive(Clone, PartialEq, Debug)]
pub struct RenderedPoint {
    pub position: LatLng,
    pub label: String,
}

#[derive(Clone, PartialEq, Debug)]
pub struct RenderedPolyline {
    pub kind: PolylineKind,
    pub points: Vec<LatLng>,
    pub style: PolylineStyle,
}

/// Keeps everything in memory and can export it as GeoJSON, for a map library to draw directly.
#[derive(Default)]
pub struct GeoJsonSurface {
    points: BTreeMap<PointID, RenderedPoint>,
    polylines: BTreeMap<PolylineID, RenderedPolyline>,
    subscriptions: BTreeMap<SubscriptionID, (PointID, MoveCallback)>,
    next_id: u32,
}

impl GeoJsonSurface {
    pub fn new() -> GeoJsonSurface {
        GeoJsonSurface::default()
    }

    pub fn points(&self) -> impl Iterator<Item = (PointID, &RenderedPoint)> {
        self.points.iter().map(|(id, pt)| (*id, pt))
    }

    pub fn point(&self, id: PointID) -> Option<&RenderedPoint> {
        self.points.get(&id)
    }

    /// In the order they were drawn
    pub fn polylines(&self) -> impl Iterator<Item = (PolylineID, &RenderedPolyline)> {
        self.polylines.iter().map(|(id, pl)| (*id, pl))
    }

    pub fn num_subscriptions(&self) -> usize {
        self.subscriptions.len()
    }

    /// The user dropped a point somewhere else. Moves it and tells every subscriber. Returns false
    /// if the point doesn't exist.
    pub fn drag_point(&mut self, id: PointID, to: LatLng) -> bool {
        let Some(pt) = self.points.get_mut(&id) else {
            return false;
        };
        pt.position = to;
        for (point, callback) in self.subscriptions.values_mut() {
            if *point == id {
                callback(to);
            }
        }
        true
    }

    pub fn to_geojson(&self) -> FeatureCollection {
        let mut features = Vec::new();

        for pl in self.polylines.values() {
            let mut f = Feature::from(Geometry::from(geojson::Value::LineString(
                pl.points.iter().map(|pt| vec![pt.lng, pt.lat]).collect(),
            )));
            f.set_property("type", pl.kind.as_str());
            f.set_property("color", pl.style.color.clone());
            f.set_property("weight", pl.style.weight);
            f.set_property("opacity", pl.style.opacity);
            f.set_property("dash_array", pl.style.dash_array.clone());
            features.push(f);
        }

        // Points go last, so they're drawn on top of the lines
        for pt in self.points.values() {
            let mut f = Feature::from(Geometry::from(geojson::Value::Point(vec![
                pt.position.lng,
                pt.position.lat,
            ])));
            f.set_property("type", "waypoint");
            f.set_property("label", pt.label.clone());
            features.push(f);
        }

        FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        }
    }

    fn new_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl RenderingSurface for GeoJsonSurface {
    fn add_point(&mut self, position: LatLng, label: &str) -> PointID {
        let id = PointID(self.new_id());
        self.points.insert(
            id,
            RenderedPoint {
                position,
                label: label.to_string(),
            },
        );
        id
    }

    fn remove_point(&mut self, point: PointID) {
        self.points.remove(&point);
    }

    fn set_point_label(&mut self, point: PointID, label: &str) {
        if let Some(pt) = self.points.get_mut(&point) {
            pt.label = label.to_string();
        }
    }

    fn subscribe_moved(&mut self, point: PointID, callback: MoveCallback) -> SubscriptionID {
        let id = SubscriptionID(self.new_id());
        self.subscriptions.insert(id, (point, callback));
        id
    }

    fn unsubscribe(&mut self, subscription: SubscriptionID) {
        self.subscriptions.remove(&subscription);
    }

    fn add_polyline(
        &mut self,
        kind: PolylineKind,
        points: Vec<LatLng>,
        style: &PolylineStyle,
    ) -> PolylineID {
        let id = PolylineID(self.new_id());
        self.polylines.insert(
            id,
            RenderedPolyline {
                kind,
                points,
                style: style.clone(),
            },
        );
        id
    }

    fn remove_polyline(&mut self, polyline: PolylineID) {
        self.polylines.remove(&polyline);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn test_drag_notifies_subscribers() {
        let mut surface = GeoJsonSurface::new();
        let pt = surface.add_point(LatLng::new(55.1, 61.0), "1");
        let other = surface.add_point(LatLng::new(55.2, 61.4), "2");

        let moves = Rc::new(RefCell::new(Vec::new()));
        let sub = {
            let moves = moves.clone();
            surface.subscribe_moved(
                pt,
                Box::new(move |to: LatLng| moves.borrow_mut().push(to)),
            )
        };

        assert!(surface.drag_point(pt, LatLng::new(55.15, 61.1)));
        // Dragging something else doesn't call this subscriber
        assert!(surface.drag_point(other, LatLng::new(55.25, 61.5)));
        assert_eq!(*moves.borrow(), vec![LatLng::new(55.15, 61.1)]);
        assert_eq!(
            surface.point(pt).unwrap().position,
            LatLng::new(55.15, 61.1)
        );

        surface.unsubscribe(sub);
        assert_eq!(surface.num_subscriptions(), 0);
        surface.drag_point(pt, LatLng::new(55.0, 61.0));
        assert_eq!(moves.borrow().len(), 1);

        surface.remove_point(pt);
        assert!(!surface.drag_point(pt, LatLng::new(55.0, 61.0)));
    }

    #[test]
    fn test_geojson_output() {
        let mut surface = GeoJsonSurface::new();
        surface.add_point(LatLng::new(55.1, 61.0), "1");
        surface.add_polyline(
            PolylineKind::Leg,
            vec![LatLng::new(55.1, 61.0), LatLng::new(55.2, 61.4)],
            &PolylineStyle {
                color: Some("#31d3ae".to_string()),
                weight: 10.0,
                opacity: 0.75,
                dash_array: None,
            },
        );

        let fc = surface.to_geojson();
        assert_eq!(fc.features.len(), 2);

        let line = &fc.features[0];
        assert_eq!(line.property("type").unwrap(), "leg");
        assert_eq!(line.property("color").unwrap(), "#31d3ae");
        // GeoJSON is back in (lon, lat) order
        assert_eq!(
            line.geometry.as_ref().unwrap().value,
            geojson::Value::LineString(vec![vec![61.0, 55.1], vec![61.4, 55.2]])
        );

        let point = &fc.features[1];
        assert_eq!(point.property("type").unwrap(), "waypoint");
        assert_eq!(point.property("label").unwrap(), "1");
    }
}

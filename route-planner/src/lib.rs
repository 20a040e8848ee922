//! Click on a map to build a multi-stop driving route. An OSRM server computes the path, and every
//! leg between consecutive waypoints gets drawn in its own color.

use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

use anyhow::{bail, Result};
use futures::future::{self, FutureExt, LocalBoxFuture};
use futures::task::{LocalSpawn, LocalSpawnExt};
use geo::{line_measures::LengthMeasurable, Coord, Haversine};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

pub use backend::{Leg, Route, RouteRequest, RouteResponse, RoutingBackend, Step};
#[cfg(not(target_arch = "wasm32"))]
pub use backend::OsrmBackend;
pub use palette::Palette;
pub use render::{
    GeoJsonSurface, LatLng, MoveCallback, PointID, PolylineID, PolylineKind, PolylineStyle,
    RenderedPoint, RenderedPolyline, RenderingSurface, SubscriptionID,
};

mod backend;
mod palette;
mod render;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// The OSRM profile, like "driving"
    pub profile: String,
    pub osrm_url: String,
    /// Every leg is drawn like this, with a color from the palette
    pub leg_style: PolylineStyle,
    /// A thin line over the entire route
    pub overview_style: PolylineStyle,
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profile: "driving".to_string(),
            osrm_url: "http://router.project-osrm.org".to_string(),
            leg_style: PolylineStyle {
                color: None,
                weight: 10.0,
                opacity: 0.75,
                dash_array: None,
            },
            overview_style: PolylineStyle {
                color: Some("#000000".to_string()),
                weight: 1.0,
                opacity: 1.0,
                dash_array: Some("5, 8".to_string()),
            },
            timeout_secs: 30,
        }
    }
}

/// Told whenever the number of waypoints may have changed. Implementations should re-read
/// whatever they need from the `RouteState`.
pub trait RouteListener {
    fn waypoints_changed(&self);
}

#[derive(Clone, Debug, PartialEq)]
pub struct Waypoint {
    /// (longitude, latitude)
    pub position: Coord,
    /// 1-based label, always matching the position in the route
    pub index: usize,
    pub point: PointID,
    subscription: SubscriptionID,
}

/// Describes one drawn leg, for a list next to the map.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LegSummary {
    /// The 1-based waypoint labels at each end
    pub from: usize,
    pub to: usize,
    pub color: String,
    pub length_meters: f64,
}

/// The route being edited. This is a cheap handle; clones share the same state. Everything
/// happens on one thread. Mutations take effect immediately, and the returned future finishes
/// after the route has been redrawn.
pub struct RouteState<S, B> {
    inner: Rc<RefCell<Inner<S>>>,
    backend: Rc<B>,
    spawner: Rc<dyn LocalSpawn>,
}

struct Inner<S> {
    surface: S,
    config: Config,
    listener: Option<Rc<dyn RouteListener>>,

    active: bool,
    waypoints: Vec<Waypoint>,
    // leg_segments[i] connects waypoints i and i + 1
    leg_segments: Vec<PolylineID>,
    legs: Vec<LegSummary>,
    overview_segment: Option<PolylineID>,
    palette: Palette,

    // Incremented by every recompute and reset. A route response only gets drawn if nothing has
    // happened since it was requested.
    generation: usize,
}

impl<S, B> Clone for RouteState<S, B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            backend: self.backend.clone(),
            spawner: self.spawner.clone(),
        }
    }
}

impl<S: RenderingSurface + 'static, B: RoutingBackend + 'static> RouteState<S, B> {
    /// Dragging a waypoint schedules work on the `spawner`.
    pub fn new(
        surface: S,
        backend: B,
        spawner: impl LocalSpawn + 'static,
        config: Config,
    ) -> RouteState<S, B> {
        RouteState {
            inner: Rc::new(RefCell::new(Inner {
                surface,
                config,
                listener: None,

                active: false,
                waypoints: Vec::new(),
                leg_segments: Vec::new(),
                legs: Vec::new(),
                overview_segment: None,
                palette: Palette::new(),

                generation: 0,
            })),
            backend: Rc::new(backend),
            spawner: Rc::new(spawner),
        }
    }

    pub fn set_listener(&self, listener: impl RouteListener + 'static) {
        self.inner.borrow_mut().listener = Some(Rc::new(listener));
    }

    pub fn is_active(&self) -> bool {
        self.inner.borrow().active
    }

    /// Turning the route off throws away every waypoint and everything drawn. The listener is
    /// notified after every toggle, including turning the route on, so controls can refresh.
    /// Listeners may read from this `RouteState` while being notified.
    pub fn toggle_active(&self) {
        {
            let mut inner = self.inner.borrow_mut();
            inner.active = !inner.active;
            if !inner.active {
                inner.reset();
            }
        }
        self.notify();
    }

    /// Appends a waypoint. The caller is responsible for only doing this while active.
    pub fn add_waypoint(&self, position: Coord) -> LocalBoxFuture<'static, ()> {
        {
            let mut guard = self.inner.borrow_mut();
            let inner = &mut *guard;
            let index = inner.waypoints.len() + 1;
            let point = inner
                .surface
                .add_point(LatLng::from(position), &index.to_string());
            let subscription = inner
                .surface
                .subscribe_moved(point, self.on_point_moved(point));
            inner.waypoints.push(Waypoint {
                position,
                index,
                point,
                subscription,
            });
        }
        self.recompute_then_notify()
    }

    /// Removes the waypoint at a 0-based index. If only one waypoint would be left, it's removed
    /// too; a single point isn't a route.
    pub fn remove_waypoint(&self, index: usize) -> Result<LocalBoxFuture<'static, ()>> {
        {
            let mut inner = self.inner.borrow_mut();
            if index >= inner.waypoints.len() {
                bail!(
                    "Can't remove waypoint {index}; there are only {}",
                    inner.waypoints.len()
                );
            }
            inner.remove_waypoint(index);
            if inner.waypoints.len() == 1 {
                inner.remove_waypoint(0);
            }
            // Postcondition: never exactly one waypoint
            inner.renumber();
        }
        Ok(self.recompute_then_notify())
    }

    /// Clears whatever's drawn, then asks the backend for a new route, if there are at least two
    /// waypoints. Only the most recent call's response will be drawn.
    pub fn recompute(&self) -> LocalBoxFuture<'static, ()> {
        let (generation, request) = {
            let mut inner = self.inner.borrow_mut();
            inner.clear_segments();
            inner.generation += 1;
            if inner.waypoints.len() < 2 {
                return future::ready(()).boxed_local();
            }
            let request = RouteRequest::new(
                &inner.config.profile,
                inner.waypoints.iter().map(|waypt| waypt.position),
            );
            (inner.generation, request)
        };

        debug!(
            "Requesting a route through {} waypoints",
            request.coordinates.len()
        );
        let response = self.backend.route(request);
        let inner = self.inner.clone();
        async move {
            let result = response.await;
            let mut inner = inner.borrow_mut();
            if inner.generation != generation {
                debug!("Ignoring a stale route response");
                return;
            }
            match result {
                Ok(response) if response.is_ok() => inner.draw_route(response),
                // The user doesn't see anything besides the missing route
                Ok(response) => debug!(
                    "No route: {} {}",
                    response.code,
                    response.message.unwrap_or_default()
                ),
                Err(err) => warn!("Routing request failed: {err:#}"),
            }
        }
        .boxed_local()
    }

    /// Changes configuration and recalculates the route.
    pub fn set_config(&self, config: Config) -> LocalBoxFuture<'static, ()> {
        self.inner.borrow_mut().config = config;
        self.recompute()
    }

    pub fn config(&self) -> Config {
        self.inner.borrow().config.clone()
    }

    pub fn waypoints(&self) -> Vec<Waypoint> {
        self.inner.borrow().waypoints.clone()
    }

    pub fn num_waypoints(&self) -> usize {
        self.inner.borrow().waypoints.len()
    }

    pub fn num_leg_segments(&self) -> usize {
        self.inner.borrow().leg_segments.len()
    }

    pub fn has_overview(&self) -> bool {
        self.inner.borrow().overview_segment.is_some()
    }

    /// The legs currently drawn
    pub fn legs(&self) -> Vec<LegSummary> {
        self.inner.borrow().legs.clone()
    }

    /// Pairs of 1-based waypoint labels, one per leg, like "1 → 2", "2 → 3"
    pub fn leg_list_entries(&self) -> Vec<(usize, usize)> {
        let n = self.num_waypoints();
        (1..n).map(|i| (i, i + 1)).collect()
    }

    pub fn color_for_leg(&self, idx: usize) -> String {
        self.inner.borrow_mut().palette.color_for_leg(idx).to_string()
    }

    /// Don't hold onto this across an await point or a call into `RouteState`.
    pub fn surface(&self) -> Ref<S> {
        Ref::map(self.inner.borrow(), |inner| &inner.surface)
    }

    /// Don't hold onto this across an await point or a call into `RouteState`.
    pub fn surface_mut(&self) -> RefMut<S> {
        RefMut::map(self.inner.borrow_mut(), |inner| &mut inner.surface)
    }

    fn recompute_then_notify(&self) -> LocalBoxFuture<'static, ()> {
        let recompute = self.recompute();
        let state = self.clone();
        async move {
            recompute.await;
            state.notify();
        }
        .boxed_local()
    }

    fn notify(&self) {
        // Listeners read the state, so don't hold a borrow
        let listener = self.inner.borrow().listener.clone();
        if let Some(listener) = listener {
            listener.waypoints_changed();
        }
    }

    fn on_point_moved(&self, point: PointID) -> MoveCallback {
        let inner = Rc::downgrade(&self.inner);
        let backend = self.backend.clone();
        let spawner = self.spawner.clone();
        Box::new(move |to: LatLng| {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let state = RouteState {
                inner,
                backend: backend.clone(),
                spawner: spawner.clone(),
            };
            // The surface is probably borrowed while calling us, so do the work later
            if let Err(err) = spawner.spawn_local(async move {
                state.move_waypoint(point, to.to_coord()).await;
            }) {
                warn!("Couldn't handle a dragged waypoint: {err}");
            }
        })
    }

    fn move_waypoint(&self, point: PointID, to: Coord) -> LocalBoxFuture<'static, ()> {
        {
            let mut inner = self.inner.borrow_mut();
            // It might've been removed since the drag
            let Some(waypt) = inner.waypoints.iter_mut().find(|x| x.point == point) else {
                return future::ready(()).boxed_local();
            };
            waypt.position = to;
        }
        self.recompute()
    }
}

impl<S: RenderingSurface> Inner<S> {
    fn reset(&mut self) {
        self.generation += 1;
        self.clear_segments();
        for waypt in self.waypoints.drain(..) {
            self.surface.unsubscribe(waypt.subscription);
            self.surface.remove_point(waypt.point);
        }
    }

    fn remove_waypoint(&mut self, index: usize) {
        let waypt = self.waypoints.remove(index);
        self.surface.unsubscribe(waypt.subscription);
        self.surface.remove_point(waypt.point);
    }

    fn renumber(&mut self) {
        for (idx, waypt) in self.waypoints.iter_mut().enumerate() {
            if waypt.index != idx + 1 {
                waypt.index = idx + 1;
                self.surface
                    .set_point_label(waypt.point, &waypt.index.to_string());
            }
        }
    }

    fn clear_segments(&mut self) {
        if let Some(id) = self.overview_segment.take() {
            self.surface.remove_polyline(id);
        }
        for id in self.leg_segments.drain(..) {
            self.surface.remove_polyline(id);
        }
        self.legs.clear();
    }

    fn draw_route(&mut self, response: RouteResponse) {
        let Some(route) = response.routes.into_iter().next() else {
            debug!("OSRM said Ok, but returned no routes");
            return;
        };

        for (idx, leg) in route.legs.iter().enumerate() {
            let line_string = leg.line_string();
            let color = self.palette.color_for_leg(idx).to_string();
            let id = self.surface.add_polyline(
                PolylineKind::Leg,
                line_string.coords().map(|pt| LatLng::from(*pt)).collect(),
                &self.config.leg_style.with_color(&color),
            );
            self.leg_segments.push(id);
            self.legs.push(LegSummary {
                from: idx + 1,
                to: idx + 2,
                color,
                length_meters: line_string.length(&Haversine),
            });
        }

        let id = self.surface.add_polyline(
            PolylineKind::Overview,
            route
                .geometry
                .coords()
                .map(|pt| LatLng::from(*pt))
                .collect(),
            &self.config.overview_style,
        );
        self.overview_segment = Some(id);
    }
}

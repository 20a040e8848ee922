use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Once;

use anyhow::anyhow;
use futures::future::{FutureExt, LocalBoxFuture};
use futures::task::{LocalFutureObj, LocalSpawn, SpawnError};
use geo::Coord;
use wasm_bindgen::prelude::*;

use route_planner::{
    Config, GeoJsonSurface, LatLng, RouteListener, RouteRequest, RouteResponse, RouteState,
    RoutingBackend,
};

static START: Once = Once::new();

/// Lets a web map build a route by clicking. The map draws whatever `renderGeojson` returns, and
/// should redraw after every returned promise resolves.
///
/// Every method borrows immutably, so the `on_change` callback can call back into the planner
/// (`numWaypoints`, `getLegList`, `renderGeojson`) while `toggleActive` is still running.
#[wasm_bindgen]
pub struct JsRoutePlanner {
    state: RouteState<GeoJsonSurface, FetchBackend>,
    // Shared with the backend, so setConfig can change it
    osrm_url: Rc<RefCell<String>>,
}

#[wasm_bindgen]
impl JsRoutePlanner {
    /// `on_change` is called with no arguments whenever the number of waypoints changes.
    #[wasm_bindgen(constructor)]
    pub fn new(on_change: js_sys::Function) -> JsRoutePlanner {
        START.call_once(|| {
            // Panics shouldn't happen, but if they do, console.log them.
            console_error_panic_hook::set_once();
            // Only fails if a logger is already set up
            let _ = console_log::init_with_level(log::Level::Info);
        });

        let config = Config::default();
        let osrm_url = Rc::new(RefCell::new(config.osrm_url.clone()));
        let state = RouteState::new(
            GeoJsonSurface::new(),
            FetchBackend {
                base_url: osrm_url.clone(),
            },
            WasmSpawner,
            config,
        );
        state.set_listener(JsListener(on_change));
        JsRoutePlanner { state, osrm_url }
    }

    /// Updates configuration and recalculates the route.
    #[wasm_bindgen(js_name = setConfig)]
    pub fn set_config(&self, input: JsValue) -> Result<js_sys::Promise, JsValue> {
        let config: Config = serde_wasm_bindgen::from_value(input)?;
        *self.osrm_url.borrow_mut() = config.osrm_url.clone();
        Ok(to_promise(self.state.set_config(config)))
    }

    #[wasm_bindgen(js_name = toggleActive)]
    pub fn toggle_active(&self) {
        self.state.toggle_active();
    }

    #[wasm_bindgen(js_name = isActive)]
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Does nothing unless the route is active.
    #[wasm_bindgen(js_name = addWaypoint)]
    pub fn add_waypoint(&self, lon: f64, lat: f64) -> js_sys::Promise {
        if !self.state.is_active() {
            return js_sys::Promise::resolve(&JsValue::UNDEFINED);
        }
        to_promise(self.state.add_waypoint(Coord { x: lon, y: lat }))
    }

    #[wasm_bindgen(js_name = removeWaypoint)]
    pub fn remove_waypoint(&self, index: usize) -> Result<js_sys::Promise, JsValue> {
        let update = self.state.remove_waypoint(index).map_err(err_to_js)?;
        Ok(to_promise(update))
    }

    /// Call when the user finishes dragging a waypoint. The route is recalculated in the
    /// background.
    #[wasm_bindgen(js_name = dragWaypoint)]
    pub fn drag_waypoint(&self, index: usize, lon: f64, lat: f64) -> Result<(), JsValue> {
        let point = self
            .state
            .waypoints()
            .get(index)
            .map(|waypt| waypt.point)
            .ok_or_else(|| JsValue::from_str(&format!("No waypoint {index}")))?;
        self.state
            .surface_mut()
            .drag_point(point, LatLng::new(lat, lon));
        Ok(())
    }

    #[wasm_bindgen(js_name = numWaypoints)]
    pub fn num_waypoints(&self) -> usize {
        self.state.num_waypoints()
    }

    /// Waypoints, legs, and the overview line as a FeatureCollection. Each feature has a `type`
    /// property of "waypoint", "leg", or "overview", plus styling.
    #[wasm_bindgen(js_name = renderGeojson)]
    pub fn render_geojson(&self) -> Result<String, JsValue> {
        serde_json::to_string_pretty(&self.state.surface().to_geojson()).map_err(err_to_js)
    }

    /// Each drawn leg, with the labels of the waypoints on either end, the color, and length
    #[wasm_bindgen(js_name = getLegs)]
    pub fn get_legs(&self) -> Result<JsValue, JsValue> {
        Ok(serde_wasm_bindgen::to_value(&self.state.legs())?)
    }

    /// [from, to] label pairs for a list of route legs
    #[wasm_bindgen(js_name = getLegList)]
    pub fn get_leg_list(&self) -> Result<JsValue, JsValue> {
        Ok(serde_wasm_bindgen::to_value(&self.state.leg_list_entries())?)
    }
}

struct JsListener(js_sys::Function);

impl RouteListener for JsListener {
    fn waypoints_changed(&self) {
        if let Err(err) = self.0.call0(&JsValue::NULL) {
            log::warn!("Route listener failed: {err:?}");
        }
    }
}

struct FetchBackend {
    base_url: Rc<RefCell<String>>,
}

impl RoutingBackend for FetchBackend {
    fn route(
        &self,
        request: RouteRequest,
    ) -> LocalBoxFuture<'static, anyhow::Result<RouteResponse>> {
        let url = request.url(&self.base_url.borrow());
        async move {
            log::debug!("Requesting {url}");
            let resp = gloo_net::http::Request::get(&url)
                .send()
                .await
                .map_err(|err| anyhow!("Failed to call {url}: {err}"))?;
            let text = resp
                .text()
                .await
                .map_err(|err| anyhow!("Failed to read response from {url}: {err}"))?;
            RouteResponse::from_json(&text)
        }
        .boxed_local()
    }
}

struct WasmSpawner;

impl LocalSpawn for WasmSpawner {
    fn spawn_local_obj(&self, future: LocalFutureObj<'static, ()>) -> Result<(), SpawnError> {
        wasm_bindgen_futures::spawn_local(future);
        Ok(())
    }
}

fn to_promise(update: LocalBoxFuture<'static, ()>) -> js_sys::Promise {
    wasm_bindgen_futures::future_to_promise(async move {
        update.await;
        Ok(JsValue::UNDEFINED)
    })
}

fn err_to_js<E: std::fmt::Display>(err: E) -> JsValue {
    JsValue::from_str(&err.to_string())
}

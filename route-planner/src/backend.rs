use anyhow::Result;
use futures::future::LocalBoxFuture;
use geo::{Coord, LineString};
use geojson::de::deserialize_geometry;
use serde::Deserialize;

/// Computes the path through an ordered list of waypoints. Implementations shouldn't block the
/// caller; the returned future resolves whenever the answer arrives.
pub trait RoutingBackend {
    fn route(&self, request: RouteRequest) -> LocalBoxFuture<'static, Result<RouteResponse>>;
}

/// One driving route through every waypoint, in order.
#[derive(Clone, Debug, PartialEq)]
pub struct RouteRequest {
    pub profile: String,
    /// (longitude, latitude), already rounded to 5 decimal places
    pub coordinates: Vec<Coord>,
}

impl RouteRequest {
    pub fn new(profile: &str, waypoints: impl IntoIterator<Item = Coord>) -> RouteRequest {
        RouteRequest {
            profile: profile.to_string(),
            coordinates: waypoints
                .into_iter()
                .map(|pt| Coord {
                    x: round5(pt.x),
                    y: round5(pt.y),
                })
                .collect(),
        }
    }

    /// Like "61,55.1;61.4,55.2"
    pub fn coordinates_param(&self) -> String {
        self.coordinates
            .iter()
            .map(|pt| format!("{},{}", pt.x, pt.y))
            .collect::<Vec<_>>()
            .join(";")
    }

    /// The full OSRM route service URL, asking for GeoJSON geometry of every step.
    pub fn url(&self, base_url: &str) -> String {
        format!(
            "{}/route/v1/{}/{}?geometries=geojson&steps=true",
            base_url.trim_end_matches('/'),
            self.profile,
            self.coordinates_param()
        )
    }
}

// 5 decimal places is about 1 meter
fn round5(x: f64) -> f64 {
    (x * 100_000.0).round() / 100_000.0
}

/// The subset of an OSRM route service response that gets drawn.
#[derive(Clone, Debug, Deserialize)]
pub struct RouteResponse {
    pub code: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub routes: Vec<Route>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Route {
    #[serde(deserialize_with = "deserialize_geometry")]
    pub geometry: LineString,
    #[serde(default)]
    pub legs: Vec<Leg>,
}

/// The path between two consecutive waypoints
#[derive(Clone, Debug, Deserialize)]
pub struct Leg {
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Step {
    #[serde(deserialize_with = "deserialize_geometry")]
    pub geometry: LineString,
}

impl RouteResponse {
    pub fn from_json(raw: &str) -> Result<RouteResponse> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Anything else means there's no route to draw
    pub fn is_ok(&self) -> bool {
        self.code == "Ok"
    }
}

impl Leg {
    /// Glues together the geometry of every step. Consecutive steps share an endpoint, which only
    /// appears once in the result.
    pub fn line_string(&self) -> LineString {
        let mut pts: Vec<Coord> = Vec::new();
        for step in &self.steps {
            pts.extend(step.geometry.coords().copied());
        }
        pts.dedup();
        LineString::new(pts)
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub use self::osrm::OsrmBackend;

#[cfg(not(target_arch = "wasm32"))]
mod osrm {
    use std::time::Duration;

    use anyhow::{Context, Result};
    use futures::future::{FutureExt, LocalBoxFuture};
    use log::debug;

    use super::{RouteRequest, RouteResponse, RoutingBackend};

    /// Talks to an OSRM server over HTTP. The request blocks whoever polls the future, which is
    /// fine for a command-line tool, but not for a UI thread.
    pub struct OsrmBackend {
        base_url: String,
        agent: ureq::Agent,
    }

    impl OsrmBackend {
        pub fn new(base_url: &str, timeout: Duration) -> OsrmBackend {
            let agent: ureq::Agent = ureq::Agent::config_builder()
                .timeout_global(Some(timeout))
                // OSRM describes failures like NoRoute in a JSON body with a 400 status
                .http_status_as_error(false)
                .build()
                .into();
            OsrmBackend {
                base_url: base_url.to_string(),
                agent,
            }
        }
    }

    impl RoutingBackend for OsrmBackend {
        fn route(&self, request: RouteRequest) -> LocalBoxFuture<'static, Result<RouteResponse>> {
            let url = request.url(&self.base_url);
            let agent = self.agent.clone();
            async move {
                debug!("Requesting {url}");
                let response: RouteResponse = agent
                    .get(&url)
                    .call()
                    .with_context(|| format!("Failed to call {url}"))?
                    .body_mut()
                    .read_json()
                    .context("Failed to parse OSRM response")?;
                Ok(response)
            }
            .boxed_local()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_url() {
        let request = RouteRequest::new(
            "driving",
            vec![
                Coord {
                    x: 61.0,
                    y: 55.180091042975874,
                },
                Coord {
                    x: 61.370840642700195,
                    y: 55.2,
                },
            ],
        );
        assert_eq!(request.coordinates_param(), "61,55.18009;61.37084,55.2");
        assert_eq!(
            request.url("http://router.project-osrm.org/"),
            "http://router.project-osrm.org/route/v1/driving/61,55.18009;61.37084,55.2?geometries=geojson&steps=true"
        );
    }

    #[test]
    fn test_parse_response() {
        let raw = r#"{
            "code": "Ok",
            "routes": [{
                "geometry": {"type": "LineString", "coordinates": [[61.0, 55.1], [61.2, 55.15], [61.4, 55.2]]},
                "distance": 1234.5,
                "legs": [{
                    "steps": [
                        {"geometry": {"type": "LineString", "coordinates": [[61.0, 55.1], [61.2, 55.15]]}},
                        {"geometry": {"type": "LineString", "coordinates": [[61.2, 55.15], [61.4, 55.2]]}},
                        {"geometry": {"type": "LineString", "coordinates": [[61.4, 55.2], [61.4, 55.2]]}}
                    ]
                }]
            }],
            "waypoints": []
        }"#;
        let response = RouteResponse::from_json(raw).unwrap();
        assert!(response.is_ok());
        assert_eq!(response.routes.len(), 1);
        assert_eq!(response.routes[0].geometry.0.len(), 3);

        let leg = response.routes[0].legs[0].line_string();
        assert_eq!(
            leg.0,
            vec![
                Coord { x: 61.0, y: 55.1 },
                Coord { x: 61.2, y: 55.15 },
                Coord { x: 61.4, y: 55.2 },
            ]
        );
    }

    #[test]
    fn test_parse_failure_code() {
        let raw = r#"{"code": "NoRoute", "message": "Impossible route between points"}"#;
        let response = RouteResponse::from_json(raw).unwrap();
        assert!(!response.is_ok());
        assert!(response.routes.is_empty());
        assert_eq!(
            response.message.as_deref(),
            Some("Impossible route between points")
        );
    }
}

/// Generated gRPC protocol definitions for geodb.
///
/// This crate provides the protocol buffer definitions and generated code
/// for talking to a geodb server: the `GeoDbClient` stub wrapped by the
/// `geodb` client library, and the `GeoDb` server trait used by its tests.
pub mod api {
    tonic::include_proto!("api");
}

// Re-export commonly used types for convenience
pub use api::*;

impl Point {
    /// Create a point from a latitude/longitude pair
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

impl Bound {
    /// Create a circular boundary around `center` with `radius` meters
    pub fn new(center: Point, radius: i64) -> Self {
        Self {
            center: Some(center),
            radius,
        }
    }
}

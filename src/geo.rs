//! Geographic primitives shared by the API and the background collectors.
//!
//! Covers bounding-box computation, haversine distance, the sampling-point
//! generators used for traffic flow coverage, and the registry of supported
//! Kenyan cities and their major routes.

use serde::Serialize;

/// Approximate kilometers per degree of latitude.
const KM_PER_DEGREE: f64 = 111.32;

/// Mean radius of the Earth in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// A latitude/longitude pair, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    pub lat: f64,
    pub lon: f64,
}

impl Point {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// A `(min_lon, min_lat, max_lon, max_lat)` bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Compute the bounding box around a center point with the given radius in kilometers.
    pub fn around(center: Point, radius_km: f64) -> Self {
        let lat_change = radius_km / KM_PER_DEGREE;
        let lon_change = radius_km / (KM_PER_DEGREE * center.lat.to_radians().cos().abs());

        Self {
            min_lon: center.lon - lon_change,
            min_lat: center.lat - lat_change,
            max_lon: center.lon + lon_change,
            max_lat: center.lat + lat_change,
        }
    }

    /// Render in the `minLon,minLat,maxLon,maxLat` form the TomTom incidents API expects.
    pub fn to_query(&self) -> String {
        format!("{},{},{},{}", self.min_lon, self.min_lat, self.max_lon, self.max_lat)
    }
}

/// Haversine distance between two points, in kilometers.
pub fn haversine_distance(a: Point, b: Point) -> f64 {
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lon = (b.lon - a.lon).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2) + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (delta_lon / 2.0).sin().powi(2);

    EARTH_RADIUS_KM * 2.0 * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Generate sampling points in eight directions around the center at 60% of the radius.
///
/// Used for detailed report generation, where a handful of well-spread probes
/// is enough to characterize an area.
pub fn ring_sampling_points(center: Point, radius_km: f64) -> Vec<Point> {
    let mut points = vec![center];

    for angle in (0..360).step_by(45) {
        let angle_rad = f64::from(angle).to_radians();
        let lat_offset = (radius_km * 0.6) * angle_rad.cos() / KM_PER_DEGREE;
        let lon_offset = (radius_km * 0.6) * angle_rad.sin() / (KM_PER_DEGREE * center.lat.to_radians().cos().abs());

        points.push(Point::new(center.lat + lat_offset, center.lon + lon_offset));
    }

    points
}

/// Generate a grid of sampling points across 80% of the radius.
///
/// Used by the flow collector, which wants denser coverage than the report
/// generator. Returns at most `num_points` points, center first.
pub fn grid_sampling_points(center: Point, radius_km: f64, num_points: usize) -> Vec<Point> {
    let mut points = vec![center];

    let grid_size = ((num_points.saturating_sub(1)) as f64).sqrt() as i64;

    for i in 0..grid_size {
        for j in 0..grid_size {
            let lat_offset = (i as f64 - grid_size as f64 / 2.0) * (radius_km * 0.8) / grid_size as f64 / KM_PER_DEGREE;
            let lon_offset = (j as f64 - grid_size as f64 / 2.0) * (radius_km * 0.8) / grid_size as f64 / (KM_PER_DEGREE * center.lat.to_radians().cos().abs());

            points.push(Point::new(center.lat + lat_offset, center.lon + lon_offset));
        }
    }

    points.truncate(num_points);
    points
}

// City registry.

/// A supported city with its center and data-collection radius.
#[derive(Debug, Clone, Copy)]
pub struct CityInfo {
    /// Lowercase key used in query parameters and task arguments.
    pub key: &'static str,
    /// Display name stored on collected records.
    pub name: &'static str,
    pub center: Point,
    /// Radius in kilometers used when collecting data for the city.
    pub collection_radius_km: f64,
}

/// Cities covered by live endpoints and background collection.
pub const CITIES: &[CityInfo] = &[
    CityInfo {
        key: "nairobi",
        name: "Nairobi",
        center: Point::new(-1.2921, 36.8219),
        collection_radius_km: 25.0,
    },
    CityInfo {
        key: "mombasa",
        name: "Mombasa",
        center: Point::new(-4.0435, 39.6682),
        collection_radius_km: 20.0,
    },
    CityInfo {
        key: "kisumu",
        name: "Kisumu",
        center: Point::new(-0.1022, 34.7617),
        collection_radius_km: 15.0,
    },
    CityInfo {
        key: "nakuru",
        name: "Nakuru",
        center: Point::new(-0.3031, 36.0800),
        collection_radius_km: 15.0,
    },
    CityInfo {
        key: "eldoret",
        name: "Eldoret",
        center: Point::new(0.5143, 35.2698),
        collection_radius_km: 15.0,
    },
];

/// Look up a supported city by its (case-insensitive) key.
pub fn find_city(key: &str) -> Option<&'static CityInfo> {
    let key = key.to_lowercase();
    CITIES.iter().find(|c| c.key == key)
}

/// Keys of all supported cities, for error messages.
pub fn city_keys() -> Vec<&'static str> {
    CITIES.iter().map(|c| c.key).collect()
}

/// Fallback coordinates for location strings the geocoder cannot resolve.
///
/// Extends the live-city registry with a few more towns the report generator
/// should recognize by name.
pub fn known_location_coordinates(location: &str) -> Option<Point> {
    const EXTRA: &[(&str, Point)] = &[
        ("thika", Point::new(-1.0332, 37.0692)),
        ("malindi", Point::new(-3.2197, 40.1169)),
        ("kitale", Point::new(1.0167, 35.0000)),
        ("garissa", Point::new(-0.4569, 39.6582)),
        ("kakamega", Point::new(0.2827, 34.7519)),
    ];

    let location = location.to_lowercase();
    let location = location.trim();

    for city in CITIES {
        if location.contains(city.key) || city.key.contains(location) {
            return Some(city.center);
        }
    }

    for (name, point) in EXTRA {
        if location.contains(name) || name.contains(location) {
            return Some(*point);
        }
    }

    None
}

// Major routes.

/// A named major route with start and end coordinates.
#[derive(Debug, Clone, Copy)]
pub struct MajorRoute {
    pub name: &'static str,
    pub start: Point,
    pub end: Point,
}

/// Major routes considered during detailed report generation.
pub const MAJOR_ROUTES: &[MajorRoute] = &[
    MajorRoute {
        name: "Uhuru Highway",
        start: Point::new(-1.2921, 36.8219),
        end: Point::new(-1.3073, 36.8219),
    },
    MajorRoute {
        name: "Waiyaki Way",
        start: Point::new(-1.2651, 36.8048),
        end: Point::new(-1.2434, 36.7073),
    },
    MajorRoute {
        name: "Ngong Road",
        start: Point::new(-1.2921, 36.8219),
        end: Point::new(-1.3670, 36.7756),
    },
    MajorRoute {
        name: "Thika Road",
        start: Point::new(-1.2634, 36.8309),
        end: Point::new(-1.0332, 37.0692),
    },
    MajorRoute {
        name: "Mombasa Road",
        start: Point::new(-1.2921, 36.8219),
        end: Point::new(-1.3670, 36.8950),
    },
];

impl MajorRoute {
    /// Whether either endpoint of the route falls within the analysis area.
    pub fn intersects_area(&self, center: Point, radius_km: f64) -> bool {
        haversine_distance(center, self.start) <= radius_km || haversine_distance(center, self.end) <= radius_km
    }
}

// Tests.

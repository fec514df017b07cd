// Copyright Rouven Bauer
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Spatial types.
//!
//! The server only distinguishes points by their SRID, hence each type here
//! carries a fixed one.

pub(crate) const SRID_CARTESIAN_2D: i64 = 7203;
pub(crate) const SRID_CARTESIAN_3D: i64 = 9157;
pub(crate) const SRID_WGS84_2D: i64 = 4326;
pub(crate) const SRID_WGS84_3D: i64 = 4979;

/// A 2D point in the cartesian coordinate system (SRID 7203).
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Cartesian2D {
    coordinates: [f64; 2],
}

impl Cartesian2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            coordinates: [x, y],
        }
    }

    pub fn x(&self) -> f64 {
        self.coordinates[0]
    }

    pub fn y(&self) -> f64 {
        self.coordinates[1]
    }

    pub fn srid(&self) -> i64 {
        SRID_CARTESIAN_2D
    }
}

/// A 3D point in the cartesian coordinate system (SRID 9157).
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Cartesian3D {
    coordinates: [f64; 3],
}

impl Cartesian3D {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            coordinates: [x, y, z],
        }
    }

    pub fn x(&self) -> f64 {
        self.coordinates[0]
    }

    pub fn y(&self) -> f64 {
        self.coordinates[1]
    }

    pub fn z(&self) -> f64 {
        self.coordinates[2]
    }

    pub fn srid(&self) -> i64 {
        SRID_CARTESIAN_3D
    }
}

/// A 2D point in the WGS84 coordinate system (SRID 4326):
/// longitude, latitude.
#[derive(Debug, Copy, Clone, PartialEq)]
#[allow(non_camel_case_types)]
pub struct WGS84_2D {
    coordinates: [f64; 2],
}

impl WGS84_2D {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            coordinates: [longitude, latitude],
        }
    }

    pub fn longitude(&self) -> f64 {
        self.coordinates[0]
    }

    pub fn latitude(&self) -> f64 {
        self.coordinates[1]
    }

    pub fn srid(&self) -> i64 {
        SRID_WGS84_2D
    }
}

/// A 3D point in the WGS84 coordinate system (SRID 4979):
/// longitude, latitude, altitude.
#[derive(Debug, Copy, Clone, PartialEq)]
#[allow(non_camel_case_types)]
pub struct WGS84_3D {
    coordinates: [f64; 3],
}

impl WGS84_3D {
    pub fn new(longitude: f64, latitude: f64, altitude: f64) -> Self {
        Self {
            coordinates: [longitude, latitude, altitude],
        }
    }

    pub fn longitude(&self) -> f64 {
        self.coordinates[0]
    }

    pub fn latitude(&self) -> f64 {
        self.coordinates[1]
    }

    pub fn altitude(&self) -> f64 {
        self.coordinates[2]
    }

    pub fn srid(&self) -> i64 {
        SRID_WGS84_3D
    }
}

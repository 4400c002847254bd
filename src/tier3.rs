// SPDX-FileCopyrightText: © 2024 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

//! Tier-3 fleet collaborator: log collection, fleet status and hazard
//! sharing across vehicles.
//!
//! The scheduling core only pushes data through [`FleetUplink`] and may poll
//! the hazards of a region. Nothing here affects scheduling decisions.

use serde::Serialize;

/// Last status reported by a vehicle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FleetStatus {
    /// Remaining battery, in %.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery: Option<f64>,
    /// Speed, in km/h.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HazardEvent {
    pub vehicle_id: String,
    pub hazard: String,
    /// Region where the hazard has been observed.
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectedLog {
    pub vehicle_id: String,
    pub log: serde_json::Value,
}

/// Fleet-level summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FleetReport {
    pub total_vehicles: usize,
    /// Vehicles with less than 20% battery, sorted by id.
    pub low_battery_vehicles: Vec<String>,
    /// Average speed over all the vehicles, 0 if there are none.
    pub average_speed: f64,
}

const LOW_BATTERY_THRESHOLD: f64 = 20.0;

/// Calls issued by the lower tiers towards Tier-3.
pub trait FleetUplink {
    fn collect_data(&mut self, vehicle_id: &str, log: serde_json::Value);

    fn update_fleet_status(&mut self, vehicle_id: &str, status: FleetStatus);

    fn report_hazard(&mut self, vehicle_id: &str, hazard_type: &str, location: &str);

    /// Hazards observed in a region, or everywhere if `region` is None.
    fn distribute_hazards(&self, region: Option<&str>) -> Vec<HazardEvent>;
}

/// In-memory Tier-3 aggregator.
#[derive(Debug, Default)]
pub struct CloudAggregator {
    data_lake: Vec<CollectedLog>,
    fleet_status: std::collections::BTreeMap<String, FleetStatus>,
    hazard_events: Vec<HazardEvent>,
}

impl CloudAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data_lake(&self) -> &[CollectedLog] {
        &self.data_lake
    }

    pub fn status(&self, vehicle_id: &str) -> Option<&FleetStatus> {
        self.fleet_status.get(vehicle_id)
    }

    pub fn fleet_report(&self) -> FleetReport {
        let low_battery_vehicles = self
            .fleet_status
            .iter()
            .filter(|(_, s)| s.battery.unwrap_or(100.0) < LOW_BATTERY_THRESHOLD)
            .map(|(vehicle_id, _)| vehicle_id.clone())
            .collect();
        let speed_sum = self
            .fleet_status
            .values()
            .map(|s| s.speed.unwrap_or_default())
            .sum::<f64>();
        FleetReport {
            total_vehicles: self.fleet_status.len(),
            low_battery_vehicles,
            average_speed: speed_sum / std::cmp::max(1, self.fleet_status.len()) as f64,
        }
    }
}

impl FleetUplink for CloudAggregator {
    fn collect_data(&mut self, vehicle_id: &str, log: serde_json::Value) {
        log::debug!("collected log from {}: {}", vehicle_id, log);
        self.data_lake.push(CollectedLog {
            vehicle_id: vehicle_id.to_string(),
            log,
        });
    }

    fn update_fleet_status(&mut self, vehicle_id: &str, status: FleetStatus) {
        log::debug!("updated fleet status for {}: {:?}", vehicle_id, status);
        self.fleet_status.insert(vehicle_id.to_string(), status);
    }

    fn report_hazard(&mut self, vehicle_id: &str, hazard_type: &str, location: &str) {
        log::info!(
            "hazard recorded: {} in {} by {}",
            hazard_type,
            location,
            vehicle_id
        );
        self.hazard_events.push(HazardEvent {
            vehicle_id: vehicle_id.to_string(),
            hazard: hazard_type.to_string(),
            location: location.to_string(),
        });
    }

    fn distribute_hazards(&self, region: Option<&str>) -> Vec<HazardEvent> {
        let events = self
            .hazard_events
            .iter()
            .filter(|e| region.map_or(true, |region| e.location == region))
            .cloned()
            .collect::<Vec<_>>();
        log::debug!("sharing {} hazards for region {:?}", events.len(), region);
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fleet_report() {
        let mut cloud = CloudAggregator::new();
        assert_eq!(
            FleetReport {
                total_vehicles: 0,
                low_battery_vehicles: vec![],
                average_speed: 0.0
            },
            cloud.fleet_report()
        );

        cloud.update_fleet_status(
            "veh_A",
            FleetStatus {
                battery: Some(15.0),
                speed: Some(45.0),
                location: Some("Zone-1".to_string()),
                event: None,
            },
        );
        cloud.update_fleet_status(
            "veh_B",
            FleetStatus {
                battery: Some(80.0),
                speed: Some(60.0),
                ..Default::default()
            },
        );
        // missing battery counts as full, missing speed as zero
        cloud.update_fleet_status("veh_C", FleetStatus::default());

        let report = cloud.fleet_report();
        assert_eq!(3, report.total_vehicles);
        assert_eq!(vec!["veh_A".to_string()], report.low_battery_vehicles);
        assert_eq!(35.0, report.average_speed);

        // the last status replaces the previous one
        cloud.update_fleet_status(
            "veh_A",
            FleetStatus {
                battery: Some(90.0),
                ..Default::default()
            },
        );
        assert!(cloud.fleet_report().low_battery_vehicles.is_empty());
        assert_eq!(Some(90.0), cloud.status("veh_A").and_then(|s| s.battery));
    }

    #[test]
    fn test_hazards_and_logs() -> anyhow::Result<()> {
        let mut cloud = CloudAggregator::new();
        cloud.collect_data("veh_A", serde_json::json!({"event": "lane_change", "speed": 45}));
        cloud.collect_data("veh_B", serde_json::json!({"event": "obstacle_detected"}));
        assert_eq!(2, cloud.data_lake().len());
        assert_eq!("veh_B", cloud.data_lake()[1].vehicle_id);

        cloud.report_hazard("veh_A", "slippery_road", "Zone-1");
        cloud.report_hazard("veh_B", "accident", "Zone-2");
        cloud.report_hazard("veh_B", "obstacle", "Zone-1");

        let zone1 = cloud.distribute_hazards(Some("Zone-1"));
        assert_eq!(
            vec!["slippery_road", "obstacle"],
            zone1.iter().map(|e| e.hazard.as_str()).collect::<Vec<_>>()
        );
        assert_eq!(3, cloud.distribute_hazards(None).len());
        assert!(cloud.distribute_hazards(Some("Zone-3")).is_empty());

        let json = serde_json::to_value(&zone1[0])?;
        assert_eq!("veh_A", json["vehicle_id"]);
        Ok(())
    }
}

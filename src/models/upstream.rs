//! Wire types for the upstream data sources.
//!
//! Includes structs for:
//! - Deserializing the government (data.gov.in / CPCB) real-time station feed.
//! - Deserializing the OpenWeatherMap air-pollution history API.
//! - Deserializing rows of a per-city CSV seed dataset.
//!
//! These types stay close to the upstream payloads; conversion into the canonical
//! [`PollutantReading`](crate::models::PollutantReading) happens in the respective clients.

use serde::{Deserialize, Deserializer, Serialize};

/// Custom deserializer for numeric fields that upstream encodes as a number, a numeric string,
/// or a placeholder such as `"NA"`. Anything unparseable becomes `None`.
pub fn deserialize_lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};
    use std::fmt;

    struct LenientVisitor;

    impl<'de> Visitor<'de> for LenientVisitor {
        type Value = Option<f64>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a number, a numeric string or null")
        }

        fn visit_f64<E: de::Error>(self, value: f64) -> Result<Option<f64>, E> {
            Ok(Some(value).filter(|v| v.is_finite()))
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Option<f64>, E> {
            Ok(Some(value as f64))
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Option<f64>, E> {
            Ok(Some(value as f64))
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Option<f64>, E> {
            Ok(value.trim().parse::<f64>().ok().filter(|v| v.is_finite()))
        }

        fn visit_none<E: de::Error>(self) -> Result<Option<f64>, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Option<f64>, E> {
            Ok(None)
        }

        fn visit_some<D2>(self, deserializer: D2) -> Result<Option<f64>, D2::Error>
        where
            D2: Deserializer<'de>,
        {
            deserializer.deserialize_any(LenientVisitor)
        }
    }

    deserializer.deserialize_any(LenientVisitor)
}

// --- Government station feed ---

/// Response envelope of the data.gov.in real-time AQI resource.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CpcbResponse {
    #[serde(default)]
    pub records: Vec<CpcbRecord>,
    #[serde(default, deserialize_with = "deserialize_lenient_f64")]
    pub total: Option<f64>,
}

/// One (station, pollutant) row of the government feed.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CpcbRecord {
    pub state: Option<String>,
    pub city: Option<String>,
    pub station: Option<String>,
    /// IST wall-clock time, `dd-mm-YYYY HH:MM:SS`.
    pub last_update: Option<String>,
    #[serde(default, deserialize_with = "deserialize_lenient_f64")]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_lenient_f64")]
    pub longitude: Option<f64>,
    pub pollutant_id: Option<String>,
    #[serde(
        default,
        alias = "pollutant_avg",
        deserialize_with = "deserialize_lenient_f64"
    )]
    pub avg_value: Option<f64>,
}

// --- Commercial air-pollution history API ---

/// Response of `/data/2.5/air_pollution/history`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OwmHistoryResponse {
    #[serde(default)]
    pub list: Vec<OwmItem>,
}

/// One hourly item. Both fields are optional on the wire so a broken item can be counted and
/// skipped instead of failing the whole payload.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OwmItem {
    /// Unix timestamp (seconds).
    pub dt: Option<i64>,
    pub components: Option<OwmComponents>,
}

/// Component concentrations in µg/m³.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OwmComponents {
    pub pm2_5: Option<f64>,
    pub pm10: Option<f64>,
    pub no2: Option<f64>,
    pub co: Option<f64>,
    pub o3: Option<f64>,
    pub so2: Option<f64>,
}

// --- CSV seed dataset ---

/// One row of a seed CSV. Header spellings are normalized through aliases.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedRow {
    #[serde(alias = "Datetime", alias = "datetime", alias = "Timestamp")]
    pub timestamp: String,
    #[serde(
        default,
        alias = "PM2_5_ugm3",
        alias = "PM2.5",
        alias = "pm25",
        deserialize_with = "csv::invalid_option"
    )]
    pub pm2_5: Option<f64>,
    #[serde(
        default,
        alias = "PM10_ugm3",
        alias = "PM10",
        deserialize_with = "csv::invalid_option"
    )]
    pub pm10: Option<f64>,
    #[serde(
        default,
        alias = "NO2_ugm3",
        alias = "NO2",
        deserialize_with = "csv::invalid_option"
    )]
    pub no2: Option<f64>,
    #[serde(
        default,
        alias = "CO_ugm3",
        alias = "CO",
        deserialize_with = "csv::invalid_option"
    )]
    pub co: Option<f64>,
    #[serde(
        default,
        alias = "O3_ugm3",
        alias = "O3",
        alias = "OZONE",
        deserialize_with = "csv::invalid_option"
    )]
    pub o3: Option<f64>,
    #[serde(
        default,
        alias = "SO2_ugm3",
        alias = "SO2",
        deserialize_with = "csv::invalid_option"
    )]
    pub so2: Option<f64>,
    #[serde(
        default,
        alias = "Temp_2m_C",
        deserialize_with = "csv::invalid_option"
    )]
    pub temperature: Option<f64>,
    #[serde(
        default,
        alias = "Humidity_Percent",
        deserialize_with = "csv::invalid_option"
    )]
    pub humidity: Option<f64>,
    #[serde(
        default,
        alias = "Wind_Speed_10m_kmh",
        deserialize_with = "csv::invalid_option"
    )]
    pub wind_speed: Option<f64>,
    #[serde(
        default,
        alias = "AQI_computed",
        alias = "AQI",
        deserialize_with = "csv::invalid_option"
    )]
    pub aqi: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cpcb_record_accepts_string_and_na_values() {
        let body = json!({
            "total": "2",
            "records": [
                {"station": "ITO, Delhi - CPCB", "pollutant_id": "PM2.5", "avg_value": "187"},
                {"station": "ITO, Delhi - CPCB", "pollutant_id": "NO2", "pollutant_avg": "NA"},
                {"station": "ITO, Delhi - CPCB", "pollutant_id": "SO2", "avg_value": 12.5}
            ]
        });

        let parsed: CpcbResponse = serde_json::from_value(body).unwrap();

        assert_eq!(parsed.total, Some(2.0));
        assert_eq!(parsed.records[0].avg_value, Some(187.0));
        assert_eq!(parsed.records[1].avg_value, None);
        assert_eq!(parsed.records[2].avg_value, Some(12.5));
    }

    #[test]
    fn test_owm_item_tolerates_missing_fields() {
        let body = json!({
            "list": [
                {"dt": 1700000000, "main": {"aqi": 4}, "components": {"pm2_5": 80.5, "co": 900.0}},
                {"main": {"aqi": 3}}
            ]
        });

        let parsed: OwmHistoryResponse = serde_json::from_value(body).unwrap();

        assert_eq!(parsed.list.len(), 2);
        assert_eq!(parsed.list[0].components.as_ref().unwrap().pm2_5, Some(80.5));
        assert!(parsed.list[1].dt.is_none());
    }
}

use hifitime::{Duration, Epoch};
use quakeloc::cosmic::pick::{AuthorType, Pick, Station};
use quakeloc::cosmic::Hypocenter;
use quakeloc::geodesy;
use quakeloc::ttime::{TravelTimeModel, UniformModel};

pub fn origin_epoch() -> Epoch {
    Epoch::from_gregorian_utc_at_midnight(2026, 3, 1)
}

/// A surface-focus test network: four stations at roughly 10 to 40 degrees,
/// one per cardinal direction.
pub fn cardinal_stations() -> Vec<Station> {
    vec![
        Station::new("N10", "QK", "00", 10.0, 0.0, 0.0),
        Station::new("E20", "QK", "00", 0.0, 20.0, 0.0),
        Station::new("S30", "QK", "00", -30.0, 0.0, 0.0),
        Station::new("W40", "QK", "00", 0.0, -40.0, 0.0),
    ]
}

pub fn model() -> UniformModel {
    let mut model = UniformModel::default();
    model.set_session("uniform8").unwrap();
    model
}

/// Direct-phase picks whose arrivals are exactly consistent with `truth`
/// through `model`, one per station in order.
pub fn consistent_picks(
    truth: &Hypocenter,
    stations: &[Station],
    model: &UniformModel,
) -> Vec<Pick> {
    stations
        .iter()
        .enumerate()
        .map(|(i, station)| {
            let (delta_deg, _) = geodesy::delta_azimuth(&truth.trig, &station.trig);
            let tt = model
                .predict(truth.depth_km, delta_deg, station.elevation_m)
                .unwrap()[0]
                .time_s;
            Pick::new(
                &format!("p{i}"),
                i,
                truth.origin_time + Duration::from_seconds(tt),
                "P",
                AuthorType::LocalAutomatic,
                1.0,
                1.0,
                true,
            )
        })
        .collect()
}

/// One extra pick at `station_index` whose arrival matches the
/// core-reflected branch from `truth`, but mislabeled as direct P.
pub fn mislabeled_core_pick(
    id: &str,
    truth: &Hypocenter,
    station_index: usize,
    stations: &[Station],
    model: &UniformModel,
) -> Pick {
    let station = &stations[station_index];
    let (delta_deg, _) = geodesy::delta_azimuth(&truth.trig, &station.trig);
    let tt = model
        .predict(truth.depth_km, delta_deg, station.elevation_m)
        .unwrap()[1]
        .time_s;
    Pick::new(
        id,
        station_index,
        truth.origin_time + Duration::from_seconds(tt),
        "P",
        AuthorType::LocalAutomatic,
        1.0,
        1.0,
        true,
    )
}

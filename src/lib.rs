pub mod activation;
pub mod deviation;
pub mod feeder;
pub mod fetch;
pub mod geometry;
pub mod projection;
pub mod schedule;
pub mod sink;
pub mod vehicles;

pub mod gtfs_rt {
    include!(concat!(env!("OUT_DIR"), "/transit_realtime.rs"));
}

pub mod assignment;
pub mod courier;
pub mod delivery_person;
pub mod order;
pub mod status;
pub mod tracking;

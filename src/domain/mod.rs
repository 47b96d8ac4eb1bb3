// Domain layer: membership model and the ports to the portal's external collaborators.

pub mod model;
pub mod ports;

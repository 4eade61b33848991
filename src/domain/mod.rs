// Domain layer: threat-intel models and the ports the pipeline and jobs are written against.

pub mod model;
pub mod ports;

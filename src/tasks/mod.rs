//! Background tasks

mod ingress;

pub use ingress::IngressTask;

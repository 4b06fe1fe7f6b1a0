//! End-to-end tests for the credential bootstrap and publish loop.
//!
//! Identity, certificate and key daemons are faked on temporary Unix
//! sockets so the real clients run against the real wire format.


#[cfg(test)]
mod bootstrap_scenarios;

#[cfg(test)]
mod failure_scenarios;

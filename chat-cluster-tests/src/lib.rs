pub mod harness;

#[cfg(test)]
mod leader_failure_tests;

#[cfg(test)]
mod persistence_tests;


#[cfg(test)]
mod quorum_loss_tests;

#[cfg(test)]
mod client_failover_tests;

#[cfg(test)]
mod idempotent_register_tests;

//! Scenario tests that drive a whole [`Station`](crate::station::Station)
//! with in-memory collaborators and explicit clocks.

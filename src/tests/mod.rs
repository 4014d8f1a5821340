//! End-to-end tests: the full router against a wiremock ChirpStack.

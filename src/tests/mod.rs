mod support;

mod credential_isolation_test;
mod delegation_test;
mod timeout_retry_test;

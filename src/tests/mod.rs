mod index_test;
mod server_test;
mod txn_test;

pub(crate) mod touch;

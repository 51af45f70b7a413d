pub(crate) mod pqueue;

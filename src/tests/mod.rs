mod endtoend;
mod roundtrip;

mod state_store_pubsub;

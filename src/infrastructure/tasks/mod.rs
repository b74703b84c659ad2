mod update_actor;

pub use update_actor::{
    UPDATE_QUEUE_CAP, UpdateOutcome, UpdateOutcomeChannel, UpdateRequest, UpdateRequestChannel,
    update_actor,
};

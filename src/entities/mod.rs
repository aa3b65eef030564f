pub mod artist_member;
pub mod artist_member_ledger;
pub mod card;
pub mod cart_entry;
pub mod fulfillment_key;
pub mod purchase_record;

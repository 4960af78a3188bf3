pub mod mbr;

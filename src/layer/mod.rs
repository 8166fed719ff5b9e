pub mod activations;
pub mod arithmetic;
pub mod conv2d;
pub mod dropout;
pub mod factory;
pub mod fully_connected;
pub mod layer;
pub mod normalization;
pub mod padding;
pub mod param_source;
pub mod pooling;
pub mod softmax;
pub mod upsampling;

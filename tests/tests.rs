// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

mod analyzer;
mod detector;
mod factory;
mod optionality;
mod parser;
mod typing;
